//! Request plus response relay pair
//!
//! The two legs run concurrently on the same broker session and disjoint
//! destinations. Correlation travels in message attributes only; no request
//! table is kept.

use tracing::info;

use super::Relay;
use crate::error::BridgeError;

pub struct RequestResponseRelay {
    request: Relay,
    response: Relay,
}

impl RequestResponseRelay {
    pub fn new(request: Relay, response: Relay) -> Self {
        Self { request, response }
    }

    pub fn request(&self) -> &Relay {
        &self.request
    }

    pub fn response(&self) -> &Relay {
        &self.response
    }

    pub fn into_parts(self) -> (Relay, Relay) {
        (self.request, self.response)
    }

    /// Run both legs until either fails
    pub async fn run(self) -> Result<(), BridgeError> {
        info!(
            "Request-response relay: Starting legs '{}' and '{}'",
            self.request.name(),
            self.response.name()
        );
        tokio::try_join!(self.request.run(), self.response.run())?;
        Ok(())
    }
}
