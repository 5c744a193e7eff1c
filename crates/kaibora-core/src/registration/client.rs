use std::time::Duration;

use reqwest::Client;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::api::client::REQUEST_TIMEOUT_SECS;
use crate::models::RegistrationForm;

use super::LocalStorage;

/// Guild backend registration endpoint
pub const DEFAULT_REGISTRATION_URL: &str = "http://127.0.0.1:5000/registrar";

/// Page to navigate to after a successful registration
pub const NEXT_PAGE: &str = "kaibora.html";

/// Local storage key the next page reads the adventurer name from
pub const ADVENTURER_NAME_KEY: &str = "aventureiroNome";

#[derive(Error, Debug)]
pub enum RegistrationError {
    #[error("Falha no registro! Status: {0}")]
    Rejected(u16),

    #[error("{0}")]
    Network(#[from] reqwest::Error),

    #[error("Failed to save adventurer name: {0}")]
    Storage(anyhow::Error),
}

impl RegistrationError {
    /// The message shown to the adventurer in place of the form.
    pub fn user_message(&self) -> String {
        format!(
            "\"Oh não! Aventureiro, parece que... *zzzt*... minha conexão com a Guilda caiu! \
             Não consigo processar seu registro.\n\n(Erro: {})\"",
            self
        )
    }
}

/// Outcome of a successful registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registered {
    pub adventurer_name: String,
    /// Page to navigate to
    pub redirect: &'static str,
}

/// Client for the registration endpoint.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct RegistrationClient {
    client: Client,
    endpoint: Url,
}

impl RegistrationClient {
    pub fn new(endpoint: Url) -> Result<Self, RegistrationError> {
        Self::with_timeout(endpoint, Duration::from_secs(REQUEST_TIMEOUT_SECS))
    }

    pub fn with_timeout(endpoint: Url, timeout: Duration) -> Result<Self, RegistrationError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoint })
    }

    /// POST the form as JSON. Any 2xx status is a success.
    pub async fn submit(&self, form: &RegistrationForm) -> Result<(), RegistrationError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), endpoint = %self.endpoint, "Registration rejected");
            return Err(RegistrationError::Rejected(status.as_u16()));
        }
        Ok(())
    }

    /// Submit the form, then remember the adventurer name for the next page.
    ///
    /// Nothing is written locally unless the backend accepted the form.
    pub async fn register(
        &self,
        form: &RegistrationForm,
        storage: &mut LocalStorage,
    ) -> Result<Registered, RegistrationError> {
        self.submit(form).await?;

        storage
            .set(ADVENTURER_NAME_KEY, &form.adventurer_name)
            .map_err(RegistrationError::Storage)?;

        info!(adventurer = %form.adventurer_name, "Registered adventurer");
        Ok(Registered {
            adventurer_name: form.adventurer_name.clone(),
            redirect: NEXT_PAGE,
        })
    }
}
