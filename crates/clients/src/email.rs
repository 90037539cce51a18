//! Credential delivery via SMTP.
//!
//! [`SmtpCredentialMailer`] wraps the `lettre` async SMTP transport to send
//! the generated administrator credentials to the user who requested the
//! tenant. Configuration is loaded from environment variables; if
//! `SMTP_HOST` is not set, [`EmailConfig::from_env`] returns `None` and no
//! mailer is constructed.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use provisioner_pipeline::collaborators::{CollaboratorError, CredentialMailer, CredentialNotice};
use provisioner_pipeline::config::env_optional;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Error type for email delivery failures.
#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    /// SMTP transport-level failure (authentication, connection, etc.).
    #[error("SMTP transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),

    /// The recipient or sender address could not be parsed.
    #[error("Email address parse error: {0}")]
    Address(#[from] lettre::address::AddressError),

    /// The MIME message could not be assembled.
    #[error("Email build error: {0}")]
    Build(String),
}

// ---------------------------------------------------------------------------
// EmailConfig
// ---------------------------------------------------------------------------

/// Default SMTP port (STARTTLS).
const DEFAULT_SMTP_PORT: u16 = 587;

/// Default sender address when `SMTP_FROM` is not set.
const DEFAULT_FROM_ADDRESS: &str = "noreply@provisioner.local";

/// Configuration for the SMTP credential mailer.
#[derive(Clone)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    /// RFC 5322 "From" address.
    pub from_address: String,
    pub smtp_user: Option<String>,
    pub smtp_password: Option<String>,
}

impl std::fmt::Debug for EmailConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailConfig")
            .field("smtp_host", &self.smtp_host)
            .field("smtp_port", &self.smtp_port)
            .field("from_address", &self.from_address)
            .field("smtp_user", &self.smtp_user)
            .field(
                "smtp_password",
                &self.smtp_password.as_ref().map(|_| provisioner_core::redact::REDACTED),
            )
            .finish()
    }
}

impl EmailConfig {
    /// Load configuration from environment variables.
    ///
    /// Returns `None` if `SMTP_HOST` is not set, signalling that credential
    /// emails are disabled and the notify step should be skipped.
    ///
    /// | Variable        | Required | Default                     |
    /// |-----------------|----------|-----------------------------|
    /// | `SMTP_HOST`     | yes      |                             |
    /// | `SMTP_PORT`     | no       | `587`                       |
    /// | `SMTP_FROM`     | no       | `noreply@provisioner.local` |
    /// | `SMTP_USER`     | no       |                             |
    /// | `SMTP_PASSWORD` | no       |                             |
    pub fn from_env() -> Option<Self> {
        let smtp_host = env_optional("SMTP_HOST")?;
        Some(Self {
            smtp_host,
            smtp_port: env_optional("SMTP_PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_SMTP_PORT),
            from_address: env_optional("SMTP_FROM")
                .unwrap_or_else(|| DEFAULT_FROM_ADDRESS.to_string()),
            smtp_user: env_optional("SMTP_USER"),
            smtp_password: env_optional("SMTP_PASSWORD"),
        })
    }
}

// ---------------------------------------------------------------------------
// SmtpCredentialMailer
// ---------------------------------------------------------------------------

/// Sends credential notices via SMTP.
pub struct SmtpCredentialMailer {
    config: EmailConfig,
}

impl SmtpCredentialMailer {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    /// Assemble the plain-text credentials message.
    pub fn build_message(&self, notice: &CredentialNotice) -> Result<Message, EmailError> {
        let to = Mailbox::new(Some(notice.to_name.clone()), notice.to_email.parse()?);
        let subject = format!("Your {} workspace is ready", notice.tenant_name);
        let body = format!(
            "Hello {name},\n\n\
             The workspace \"{tenant}\" ({code}) has been provisioned.\n\n\
             Database: {database}\n\
             Login:    {login}\n\
             Password: {password}\n\n\
             Please change this password after your first sign-in.\n",
            name = notice.to_name,
            tenant = notice.tenant_name,
            code = notice.tenant_code,
            database = notice.database_name,
            login = notice.login,
            password = notice.password,
        );

        Message::builder()
            .from(self.config.from_address.parse()?)
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body)
            .map_err(|e| EmailError::Build(e.to_string()))
    }

    async fn deliver(&self, notice: &CredentialNotice) -> Result<(), EmailError> {
        let email = self.build_message(notice)?;

        let mut transport_builder =
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.smtp_host)?
                .port(self.config.smtp_port);

        if let (Some(user), Some(pass)) = (&self.config.smtp_user, &self.config.smtp_password) {
            transport_builder =
                transport_builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        let mailer = transport_builder.build();
        mailer.send(email).await?;

        tracing::info!(
            to = %notice.to_email,
            tenant_code = %notice.tenant_code,
            "Credentials email sent"
        );
        Ok(())
    }
}

#[async_trait]
impl CredentialMailer for SmtpCredentialMailer {
    async fn send_credentials(&self, notice: &CredentialNotice) -> Result<(), CollaboratorError> {
        self.deliver(notice).await.map_err(translate)
    }
}

/// Map a delivery failure to a collaborator error kind.
fn translate(err: EmailError) -> CollaboratorError {
    match &err {
        EmailError::Transport(e) if e.is_permanent() => CollaboratorError::Rejected(err.to_string()),
        EmailError::Transport(_) => CollaboratorError::Unavailable(err.to_string()),
        EmailError::Address(_) | EmailError::Build(_) => {
            CollaboratorError::MissingInput(err.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn config() -> EmailConfig {
        EmailConfig {
            smtp_host: "smtp.local".into(),
            smtp_port: DEFAULT_SMTP_PORT,
            from_address: DEFAULT_FROM_ADDRESS.into(),
            smtp_user: Some("mailer".into()),
            smtp_password: Some("smtp-secret".into()),
        }
    }

    fn notice(to_email: &str) -> CredentialNotice {
        CredentialNotice {
            to_email: to_email.into(),
            to_name: "Ada Owner".into(),
            tenant_code: "acme".into(),
            tenant_name: "Acme Ltd".into(),
            database_name: "tenant_acme".into(),
            login: "admin".into(),
            password: "Zq8generated".into(),
        }
    }

    #[test]
    fn message_carries_the_credentials() {
        let mailer = SmtpCredentialMailer::new(config());
        let message = mailer.build_message(&notice("owner@acme.test")).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("owner@acme.test"));
        assert!(raw.contains("Zq8generated"));
        assert!(raw.contains("tenant_acme"));
    }

    #[test]
    fn bad_recipient_is_missing_input() {
        let mailer = SmtpCredentialMailer::new(config());
        let err = mailer.build_message(&notice("not-an-email")).unwrap_err();
        assert_matches!(err, EmailError::Address(_));
        assert_matches!(translate(err), CollaboratorError::MissingInput(_));
    }

    #[test]
    fn email_error_display_build() {
        let err = EmailError::Build("missing body".to_string());
        assert_eq!(err.to_string(), "Email build error: missing body");
    }

    #[test]
    fn debug_hides_smtp_password() {
        assert!(!format!("{:?}", config()).contains("smtp-secret"));
    }
}
