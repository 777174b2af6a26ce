//! Channel construction from configuration.

use std::sync::Arc;

use switchyard_config::ChannelConfig;
use switchyard_protocols::{BackendChannel, ChannelError};

use crate::polling::{PollingChannel, PollingOptions};
use crate::stream::{StreamChannel, StreamOptions};

/// Build the configured channel variant.
pub fn channel_from_config(config: &ChannelConfig) -> Result<Arc<dyn BackendChannel>, ChannelError> {
    let channel: Arc<dyn BackendChannel> = match config {
        ChannelConfig::Polling(polling) => {
            Arc::new(PollingChannel::new(PollingOptions::from_config(polling)?))
        }
        ChannelConfig::Stream(stream) => Arc::new(StreamChannel::new(StreamOptions::from_config(stream))),
    };
    Ok(channel)
}
