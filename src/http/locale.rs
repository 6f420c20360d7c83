use std::fmt;

/// A language preference from an `Accept-Language` header.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Locale {
    pub language: String,
    pub country: Option<String>,
    pub variant: Option<String>,
}

impl Locale {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            country: None,
            variant: None,
        }
    }

    /// Builds a locale from a tag such as `en`, `en-US` or `de_DE_1996`.
    ///
    /// The language is lower-cased and the country upper-cased. Returns
    /// `None` for an empty tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        let mut parts = tag.split(['-', '_']).filter(|p| !p.is_empty());
        let language = parts.next()?.to_ascii_lowercase();
        let country = parts.next().map(|c| c.to_ascii_uppercase());
        let rest: Vec<&str> = parts.collect();
        let variant = if rest.is_empty() {
            None
        } else {
            Some(rest.join("_"))
        };

        Some(Self {
            language,
            country,
            variant,
        })
    }
}

impl Default for Locale {
    fn default() -> Self {
        Self::new("en")
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.language)?;
        if let Some(country) = &self.country {
            write!(f, "-{country}")?;
        }
        if let Some(variant) = &self.variant {
            write!(f, "-{variant}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_language_country_variant() {
        let locale = Locale::from_tag("de-de-1996").unwrap();
        assert_eq!(locale.language, "de");
        assert_eq!(locale.country.as_deref(), Some("DE"));
        assert_eq!(locale.variant.as_deref(), Some("1996"));
        assert_eq!(locale.to_string(), "de-DE-1996");
    }

    #[test]
    fn empty_tag_is_rejected() {
        assert!(Locale::from_tag("").is_none());
    }
}
