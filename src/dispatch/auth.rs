//! Authentication schemes and realms.
//!
//! Both are chosen by name from the login configuration and resolved
//! once, when the application is built, through [`AuthRegistry`].

use std::collections::HashMap;
use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use serde::Deserialize;
use tracing::{debug, info};

use crate::dispatch::exchange::Exchange;
use crate::error::{ConfigError, ServletError};
use crate::http::response::status;
use crate::session::Principal;

/// Path, below the mount prefix, that form logins are posted to.
pub const SECURITY_CHECK_PATH: &str = "/security_check";

/// Session attribute holding the URI a form challenge interrupted.
pub const SAVED_URI_ATTRIBUTE: &str = "vessel.form.saved_uri";

/// A user store that checks credentials.
pub trait Realm: Send + Sync {
    fn name(&self) -> &str;

    /// The principal for these credentials, if they are valid.
    fn authenticate(&self, username: &str, password: &str) -> Option<Principal>;
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct UserEntry {
    pub name: String,
    pub password: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Users listed in the login configuration.
#[derive(Debug, Default)]
pub struct MemoryRealm {
    users: HashMap<String, UserEntry>,
}

impl MemoryRealm {
    pub fn new(users: impl IntoIterator<Item = UserEntry>) -> Self {
        Self {
            users: users.into_iter().map(|u| (u.name.clone(), u)).collect(),
        }
    }
}

impl Realm for MemoryRealm {
    fn name(&self) -> &str {
        "memory"
    }

    fn authenticate(&self, username: &str, password: &str) -> Option<Principal> {
        self.users
            .get(username)
            .filter(|u| u.password == password)
            .map(|u| Principal::new(u.name.clone(), u.roles.clone(), ""))
    }
}

fn default_auth_method() -> String {
    "BASIC".to_string()
}

fn default_realm_name() -> String {
    "vessel".to_string()
}

fn default_realm() -> String {
    "memory".to_string()
}

/// How callers of constrained resources authenticate.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct LoginConfig {
    #[serde(default = "default_auth_method")]
    pub auth_method: String,
    #[serde(default = "default_realm_name")]
    pub realm_name: String,
    #[serde(default = "default_realm")]
    pub realm: String,
    #[serde(default)]
    pub users: Vec<UserEntry>,
    /// Form login page, below the mount prefix.
    #[serde(default)]
    pub login_page: Option<String>,
    /// Page shown after failed form logins.
    #[serde(default)]
    pub error_page: Option<String>,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            auth_method: default_auth_method(),
            realm_name: default_realm_name(),
            realm: default_realm(),
            users: Vec::new(),
            login_page: None,
            error_page: None,
        }
    }
}

/// An authentication scheme.
pub trait Authenticator: Send + Sync {
    fn scheme(&self) -> &'static str;

    /// Picks up credentials before the request is routed.
    ///
    /// Returns `true` when the request was a login exchange that has been
    /// answered and must not be dispatched further.
    fn authenticate(&self, ex: &mut Exchange<'_>) -> Result<bool, ServletError>;

    /// Answers a request that needs credentials it does not carry.
    fn challenge(&self, ex: &mut Exchange<'_>) -> Result<(), ServletError>;
}

/// Credentials in an `Authorization: Basic` header.
pub struct BasicAuthenticator {
    realm_name: String,
    realm: Arc<dyn Realm>,
}

impl BasicAuthenticator {
    pub fn new(realm_name: impl Into<String>, realm: Arc<dyn Realm>) -> Self {
        Self {
            realm_name: realm_name.into(),
            realm,
        }
    }
}

/// Splits a `Basic` authorization value into user name and password.
pub fn decode_basic(authorization: &str) -> Option<(String, String)> {
    let (scheme, encoded) = authorization.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = general_purpose::STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

impl Authenticator for BasicAuthenticator {
    fn scheme(&self) -> &'static str {
        "BASIC"
    }

    fn authenticate(&self, ex: &mut Exchange<'_>) -> Result<bool, ServletError> {
        let Some((user, password)) = ex.request.authorization().and_then(decode_basic) else {
            return Ok(false);
        };
        match self.realm.authenticate(&user, &password) {
            Some(mut principal) => {
                principal.auth_type = self.scheme().to_string();
                ex.request.set_principal(Some(principal));
            }
            None => debug!(user, realm = self.realm.name(), "basic credentials rejected"),
        }
        Ok(false)
    }

    fn challenge(&self, ex: &mut Exchange<'_>) -> Result<(), ServletError> {
        ex.response.set_header(
            "WWW-Authenticate",
            format!("Basic realm=\"{}\"", self.realm_name),
        );
        ex.response.send_error(status::UNAUTHORIZED, None)
    }
}

/// Login through an application page posting to [`SECURITY_CHECK_PATH`].
pub struct FormAuthenticator {
    realm: Arc<dyn Realm>,
    login_page: String,
    error_page: Option<String>,
}

impl FormAuthenticator {
    pub fn new(realm: Arc<dyn Realm>, login_page: impl Into<String>, error_page: Option<String>) -> Self {
        Self {
            realm,
            login_page: login_page.into(),
            error_page,
        }
    }

    fn login(&self, ex: &mut Exchange<'_>) -> Result<(), ServletError> {
        let user = ex.request.parameter("username").map(str::to_string);
        let password = ex.request.parameter("password").map(str::to_string);
        let context = ex.request.context_path().to_string();

        let principal = match (user, password) {
            (Some(user), Some(password)) => self.realm.authenticate(&user, &password),
            _ => None,
        };
        let Some(mut principal) = principal else {
            debug!(realm = self.realm.name(), "form login rejected");
            return match &self.error_page {
                Some(page) => ex.response.send_redirect(&format!("{context}{page}")),
                None => ex.response.send_error(status::UNAUTHORIZED, None),
            };
        };

        principal.auth_type = self.scheme().to_string();
        info!(user = %principal.name, "form login");
        let session = ex.session(true)?.ok_or(ServletError::IllegalState(
            "no session for form login",
        ))?;
        session.set_principal(Some(principal));
        let target = session
            .remove_attribute(SAVED_URI_ATTRIBUTE)
            .and_then(|uri| uri.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| format!("{context}/"));
        ex.response.send_redirect(&target)
    }
}

impl Authenticator for FormAuthenticator {
    fn scheme(&self) -> &'static str {
        "FORM"
    }

    fn authenticate(&self, ex: &mut Exchange<'_>) -> Result<bool, ServletError> {
        if ex.request.servlet_path() == SECURITY_CHECK_PATH && ex.request.method() == "POST" {
            self.login(ex)?;
            return Ok(true);
        }
        // Load the session so its principal is visible to the constraint check.
        ex.session(false)?;
        Ok(false)
    }

    fn challenge(&self, ex: &mut Exchange<'_>) -> Result<(), ServletError> {
        let mut original = ex.request.request_uri().to_string();
        if let Some(query) = ex.request.query_string() {
            original.push('?');
            original.push_str(query);
        }
        if let Some(session) = ex.session(true)? {
            session.set_attribute(SAVED_URI_ATTRIBUTE, original);
        }
        let login = format!("{}{}", ex.request.context_path(), self.login_page);
        ex.response.send_redirect(&login)
    }
}

pub type RealmFactory = fn(&LoginConfig) -> Result<Arc<dyn Realm>, ConfigError>;
pub type AuthenticatorFactory =
    fn(&LoginConfig, Arc<dyn Realm>) -> Result<Arc<dyn Authenticator>, ConfigError>;

fn memory_realm(config: &LoginConfig) -> Result<Arc<dyn Realm>, ConfigError> {
    Ok(Arc::new(MemoryRealm::new(config.users.iter().cloned())))
}

fn basic_scheme(
    config: &LoginConfig,
    realm: Arc<dyn Realm>,
) -> Result<Arc<dyn Authenticator>, ConfigError> {
    Ok(Arc::new(BasicAuthenticator::new(config.realm_name.clone(), realm)))
}

fn form_scheme(
    config: &LoginConfig,
    realm: Arc<dyn Realm>,
) -> Result<Arc<dyn Authenticator>, ConfigError> {
    let login_page = config
        .login_page
        .clone()
        .ok_or(ConfigError::MissingLoginConfig)?;
    Ok(Arc::new(FormAuthenticator::new(
        realm,
        login_page,
        config.error_page.clone(),
    )))
}

/// Constructors for realms and authentication schemes, by name.
#[derive(Clone)]
pub struct AuthRegistry {
    realms: HashMap<String, RealmFactory>,
    schemes: HashMap<String, AuthenticatorFactory>,
}

impl AuthRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            realms: HashMap::new(),
            schemes: HashMap::new(),
        }
    }

    /// The `memory` realm and the `BASIC` and `FORM` schemes.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register_realm("memory", memory_realm);
        registry.register_scheme("BASIC", basic_scheme);
        registry.register_scheme("FORM", form_scheme);
        registry
    }

    pub fn register_realm(&mut self, name: &str, factory: RealmFactory) {
        self.realms.insert(name.to_string(), factory);
    }

    /// Scheme names are matched case-insensitively.
    pub fn register_scheme(&mut self, name: &str, factory: AuthenticatorFactory) {
        self.schemes.insert(name.to_ascii_uppercase(), factory);
    }

    pub fn resolve(&self, config: &LoginConfig) -> Result<Arc<dyn Authenticator>, ConfigError> {
        let scheme = self
            .schemes
            .get(&config.auth_method.to_ascii_uppercase())
            .ok_or_else(|| ConfigError::UnknownAuthScheme(config.auth_method.clone()))?;
        let realm = self
            .realms
            .get(&config.realm)
            .ok_or_else(|| ConfigError::UnknownRealm(config.realm.clone()))?;
        scheme(config, realm(config)?)
    }
}

impl Default for AuthRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
