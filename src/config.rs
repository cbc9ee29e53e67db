//! Configuration - .env secrets and library root resolution

/// Secrets loaded from .env
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    pub alpha_vantage_key: Option<String>,
    pub library_root: Option<String>,
}

impl Secrets {
    /// Load secrets from .env file
    pub fn load() -> Self {
        dotenvy::dotenv().ok();

        Secrets {
            alpha_vantage_key: std::env::var("ALPHA_VANTAGE_KEY").ok(),
            library_root: std::env::var("DSP_LIBRARY_ROOT").ok(),
        }
    }
}
