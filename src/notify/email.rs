use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message as Email, Tokio1Executor,
};

use crate::model::subject::Subject;

use super::{Message, Notifier, NotifyError};

const EMAIL_SUBJECT: &str = "Your OurWill verification code";

/// Sends codes by email through an SMTP relay.
#[derive(Clone)]
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpNotifier {
    /// Connect to `host` over TLS with the given credentials.
    pub fn new(
        host: &str,
        username: String,
        password: String,
        from: Mailbox,
    ) -> Result<Self, NotifyError> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(host)?
            .credentials(Credentials::new(username, password))
            .build();
        Ok(Self { transport, from })
    }
}

#[rocket::async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, message: &Message) -> Result<(), NotifyError> {
        let address = match &message.to {
            Subject::Email(address) => address.clone(),
            Subject::Sms(_) => return Err(NotifyError::Unsupported("SMS")),
        };
        let email = Email::builder()
            .from(self.from.clone())
            .to(Mailbox::new(None, address))
            .subject(EMAIL_SUBJECT)
            .header(ContentType::TEXT_PLAIN)
            .body(message.body())?;
        self.transport.send(email).await?;
        Ok(())
    }
}
