//! Authorization seam for private and presence channels.

use crate::error::AuthError;

/// Token returned by an [`Authorizer`] for one subscribe request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelAuth {
    /// `<app key>:<signature>`
    pub auth: String,
    /// Member info, presence channels only.
    pub channel_data: Option<String>,
}

impl ChannelAuth {
    pub fn new(auth: impl Into<String>) -> Self {
        Self {
            auth: auth.into(),
            channel_data: None,
        }
    }

    pub fn with_channel_data(mut self, channel_data: impl Into<String>) -> Self {
        self.channel_data = Some(channel_data.into());
        self
    }
}

/// Signs subscribe requests for channels that require authorization.
///
/// Called without any connection lock held, once per subscribe request,
/// with the socket id of the connection the request will be sent on.
pub trait Authorizer: Send + Sync {
    fn authorize(&self, channel: &str, socket_id: &str) -> Result<ChannelAuth, AuthError>;
}

impl<F> Authorizer for F
where
    F: Fn(&str, &str) -> Result<ChannelAuth, AuthError> + Send + Sync,
{
    fn authorize(&self, channel: &str, socket_id: &str) -> Result<ChannelAuth, AuthError> {
        self(channel, socket_id)
    }
}
