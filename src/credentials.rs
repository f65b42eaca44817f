//! Earthdata and ESA/CDSE credential resolution.
//!
//! Each credential is resolved with a strict precedence: explicit CLI value,
//! then named environment variable, then a netrc entry keyed by host. The
//! resolved bundle is built once per invocation and passed by parameter into
//! the dispatch and publish steps; nothing here writes credentials back to
//! disk or the environment.
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Host used for Earthdata netrc lookups.
pub const EARTHDATA_HOST: &str = "urs.earthdata.nasa.gov";
/// Host used for ESA Copernicus Data Space Ecosystem netrc lookups.
pub const ESA_HOST: &str = "dataspace.copernicus.eu";

pub const EARTHDATA_USERNAME_VAR: &str = "EARTHDATA_USERNAME";
pub const EARTHDATA_PASSWORD_VAR: &str = "EARTHDATA_PASSWORD";
pub const ESA_USERNAME_VAR: &str = "ESA_USERNAME";
pub const ESA_PASSWORD_VAR: &str = "ESA_PASSWORD";

/// Fully resolved credentials; all four fields are non-empty.
#[derive(Clone)]
pub struct CredentialBundle {
    pub earthdata_username: String,
    pub earthdata_password: String,
    pub esa_username: String,
    pub esa_password: String,
}

impl fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialBundle")
            .field("earthdata_username", &self.earthdata_username)
            .field("earthdata_password", &"<redacted>")
            .field("esa_username", &self.esa_username)
            .field("esa_password", &"<redacted>")
            .finish()
    }
}

/// Credentials supplied explicitly, e.g. as CLI flags. The CLI only exposes
/// the ESA pair, but the resolver treats all four uniformly.
#[derive(Debug, Default, Clone)]
pub struct ExplicitCredentials {
    pub earthdata_username: Option<String>,
    pub earthdata_password: Option<String>,
    pub esa_username: Option<String>,
    pub esa_password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetrcEntry {
    pub login: String,
    pub password: String,
}

/// A parsed netrc-style credentials file.
#[derive(Debug, Default)]
pub struct Netrc {
    machines: HashMap<String, NetrcEntry>,
}

impl Netrc {
    /// Load the netrc file named by `$NETRC`, falling back to `~/.netrc`.
    /// A missing or unreadable file yields an empty lookup table; absence of
    /// a netrc is only an error once a credential cannot be resolved any
    /// other way.
    pub fn load() -> Self {
        match Self::path().and_then(|p| fs::read_to_string(p).ok()) {
            Some(content) => Self::parse(&content),
            None => Self::default(),
        }
    }

    fn path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("NETRC") {
            return Some(PathBuf::from(path));
        }
        dirs::home_dir().map(|home| home.join(".netrc"))
    }

    pub fn parse(content: &str) -> Self {
        let mut machines = HashMap::new();
        let mut current: Option<String> = None;
        let mut login = String::new();
        let mut password = String::new();
        let mut in_macro = false;

        for line in content.lines() {
            // a macdef body runs until the first blank line
            if in_macro {
                if line.trim().is_empty() {
                    in_macro = false;
                }
                continue;
            }

            let mut tokens = line.split_whitespace();
            while let Some(token) = tokens.next() {
                match token {
                    "machine" | "default" => {
                        Self::commit(&mut machines, &mut current, &mut login, &mut password);
                        current = if token == "default" {
                            Some("default".to_string())
                        } else {
                            tokens.next().map(str::to_string)
                        };
                    }
                    "login" => login = tokens.next().unwrap_or_default().to_string(),
                    "password" => password = tokens.next().unwrap_or_default().to_string(),
                    "account" => {
                        let _ = tokens.next();
                    }
                    "macdef" => {
                        let _ = tokens.next();
                        in_macro = true;
                        break;
                    }
                    _ => {}
                }
            }
        }
        Self::commit(&mut machines, &mut current, &mut login, &mut password);

        Self { machines }
    }

    fn commit(
        machines: &mut HashMap<String, NetrcEntry>,
        current: &mut Option<String>,
        login: &mut String,
        password: &mut String,
    ) {
        if let Some(machine) = current.take() {
            machines.insert(
                machine,
                NetrcEntry {
                    login: std::mem::take(login),
                    password: std::mem::take(password),
                },
            );
        }
        login.clear();
        password.clear();
    }

    pub fn entry(&self, machine: &str) -> Option<&NetrcEntry> {
        self.machines
            .get(machine)
            .or_else(|| self.machines.get("default"))
    }

    fn login(&self, machine: &str) -> Option<&str> {
        self.entry(machine).map(|e| e.login.as_str())
    }

    fn password(&self, machine: &str) -> Option<&str> {
        self.entry(machine).map(|e| e.password.as_str())
    }
}

/// Resolve all four credentials or fail naming the first one that cannot be
/// resolved. Inputs are injected so the precedence rules can be exercised
/// without touching process state.
pub fn resolve(
    explicit: &ExplicitCredentials,
    env: &HashMap<String, String>,
    netrc: &Netrc,
) -> Result<CredentialBundle> {
    Ok(CredentialBundle {
        earthdata_username: pick(
            explicit.earthdata_username.as_deref(),
            env.get(EARTHDATA_USERNAME_VAR),
            netrc.login(EARTHDATA_HOST),
            EARTHDATA_USERNAME_VAR,
        )?,
        earthdata_password: pick(
            explicit.earthdata_password.as_deref(),
            env.get(EARTHDATA_PASSWORD_VAR),
            netrc.password(EARTHDATA_HOST),
            EARTHDATA_PASSWORD_VAR,
        )?,
        esa_username: pick(
            explicit.esa_username.as_deref(),
            env.get(ESA_USERNAME_VAR),
            netrc.login(ESA_HOST),
            ESA_USERNAME_VAR,
        )?,
        esa_password: pick(
            explicit.esa_password.as_deref(),
            env.get(ESA_PASSWORD_VAR),
            netrc.password(ESA_HOST),
            ESA_PASSWORD_VAR,
        )?,
    })
}

/// Resolve against the real process environment and the user's netrc file.
pub fn resolve_from_process_env(explicit: &ExplicitCredentials) -> Result<CredentialBundle> {
    let env: HashMap<String, String> = std::env::vars().collect();
    resolve(explicit, &env, &Netrc::load())
}

// Empty values never satisfy a credential; a set-but-empty source falls
// through to the next one in the chain.
fn pick(
    explicit: Option<&str>,
    env: Option<&String>,
    netrc: Option<&str>,
    name: &'static str,
) -> Result<String> {
    [explicit, env.map(String::as_str), netrc]
        .into_iter()
        .flatten()
        .find(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or(Error::MissingCredential { name })
}

#[cfg(test)]
mod tests {
    use super::*;

    const NETRC: &str = "\
machine urs.earthdata.nasa.gov login nasa_user password nasa_pass
machine dataspace.copernicus.eu
    login esa_user
    password esa_pass
";

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn parses_single_line_and_multi_line_entries() {
        let netrc = Netrc::parse(NETRC);
        assert_eq!(
            netrc.entry(EARTHDATA_HOST),
            Some(&NetrcEntry {
                login: "nasa_user".to_string(),
                password: "nasa_pass".to_string(),
            })
        );
        assert_eq!(
            netrc.entry(ESA_HOST),
            Some(&NetrcEntry {
                login: "esa_user".to_string(),
                password: "esa_pass".to_string(),
            })
        );
    }

    #[test]
    fn falls_back_to_default_machine() {
        let netrc = Netrc::parse("default login any password thing\n");
        assert_eq!(netrc.login("some.other.host"), Some("any"));
    }

    #[test]
    fn skips_macdef_bodies() {
        let content = "\
machine example.com login a password b
macdef init
touch /tmp/pwned

machine dataspace.copernicus.eu login esa_user password esa_pass
";
        let netrc = Netrc::parse(content);
        assert_eq!(netrc.login(ESA_HOST), Some("esa_user"));
        assert_eq!(netrc.login("example.com"), Some("a"));
    }

    #[test]
    fn explicit_overrides_env_overrides_netrc() {
        let netrc = Netrc::parse(NETRC);
        let env = env(&[
            (ESA_USERNAME_VAR, "env_esa_user"),
            (ESA_PASSWORD_VAR, "env_esa_pass"),
        ]);
        let explicit = ExplicitCredentials {
            esa_username: Some("cli_esa_user".to_string()),
            ..Default::default()
        };

        let bundle = resolve(&explicit, &env, &netrc).unwrap();
        assert_eq!(bundle.esa_username, "cli_esa_user");
        assert_eq!(bundle.esa_password, "env_esa_pass");
        assert_eq!(bundle.earthdata_username, "nasa_user");
        assert_eq!(bundle.earthdata_password, "nasa_pass");
    }

    #[test]
    fn missing_esa_password_is_named() {
        let netrc = Netrc::parse("machine urs.earthdata.nasa.gov login u password p\n");
        let env = env(&[(ESA_USERNAME_VAR, "esa_user")]);

        let err = resolve(&ExplicitCredentials::default(), &env, &netrc).unwrap_err();
        match err {
            Error::MissingCredential { name } => assert_eq!(name, ESA_PASSWORD_VAR),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn empty_values_do_not_satisfy_resolution() {
        let env = env(&[
            (EARTHDATA_USERNAME_VAR, "u"),
            (EARTHDATA_PASSWORD_VAR, "p"),
            (ESA_USERNAME_VAR, "esa_user"),
            (ESA_PASSWORD_VAR, ""),
        ]);

        let err = resolve(&ExplicitCredentials::default(), &env, &Netrc::default()).unwrap_err();
        assert!(matches!(
            err,
            Error::MissingCredential { name: ESA_PASSWORD_VAR }
        ));
    }

    #[test]
    fn empty_env_values_fall_through_to_netrc() {
        let netrc = Netrc::parse(NETRC);
        let env = env(&[(ESA_PASSWORD_VAR, "")]);

        let bundle = resolve(&ExplicitCredentials::default(), &env, &netrc).unwrap();
        assert_eq!(bundle.esa_password, "esa_pass");
    }

    #[test]
    fn debug_output_redacts_passwords() {
        let bundle = CredentialBundle {
            earthdata_username: "u".to_string(),
            earthdata_password: "secret".to_string(),
            esa_username: "e".to_string(),
            esa_password: "hunter2".to_string(),
        };
        let rendered = format!("{bundle:?}");
        assert!(!rendered.contains("secret"));
        assert!(!rendered.contains("hunter2"));
    }
}
