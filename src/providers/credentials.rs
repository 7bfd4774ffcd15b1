use super::CredentialStore;

/// Reads the upstream key from an environment variable on every call so a
/// rotated key is picked up without restarting the listener.
#[derive(Clone, Debug)]
pub struct EnvCredentialStore {
    var: String,
}

impl EnvCredentialStore {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl CredentialStore for EnvCredentialStore {
    fn configured_credential(&self) -> String {
        std::env::var(&self.var).unwrap_or_default().trim().to_owned()
    }
}

#[derive(Clone, Debug, Default)]
pub struct StaticCredentialStore(pub String);

impl CredentialStore for StaticCredentialStore {
    fn configured_credential(&self) -> String {
        self.0.trim().to_owned()
    }
}
