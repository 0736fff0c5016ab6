use async_trait::async_trait;
use tracing::info;

/// Delivers verification codes to users.
#[async_trait]
pub trait CodeMailer: Send + Sync {
    async fn send_code(&self, email: &str, code: &str) -> anyhow::Result<()>;
}

/// Writes codes to the log instead of sending mail. Used for local development.
pub struct LogMailer;

#[async_trait]
impl CodeMailer for LogMailer {
    async fn send_code(&self, email: &str, code: &str) -> anyhow::Result<()> {
        info!("Verification code for {}: {}", email, code);
        Ok(())
    }
}
