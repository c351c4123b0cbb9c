use aws_sdk_sns::{error::DisplayErrorContext, Client as SnsClient};

use crate::model::subject::Subject;

use super::{Message, Notifier, NotifyError};

/// Sends codes as SMS through Amazon SNS.
#[derive(Clone)]
pub struct SnsNotifier {
    client: SnsClient,
}

impl SnsNotifier {
    pub fn new(client: SnsClient) -> Self {
        Self { client }
    }
}

#[rocket::async_trait]
impl Notifier for SnsNotifier {
    async fn send(&self, message: &Message) -> Result<(), NotifyError> {
        let number = match &message.to {
            Subject::Sms(number) => number.to_string(),
            Subject::Email(_) => return Err(NotifyError::Unsupported("email")),
        };
        self.client
            .publish()
            .phone_number(number)
            .message(message.body())
            .send()
            .await
            .map_err(|err| NotifyError::Sms(DisplayErrorContext(&err).to_string()))?;
        Ok(())
    }
}
