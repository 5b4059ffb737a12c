use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::Endpoints;
use crate::error::Result;
use crate::push::channel::PushChannel;
use crate::push::messages::Topic;
use crate::push::transport::PushTransport;

/// Hands out one `PushChannel` per topic for the life of the process.
pub struct PushHub {
    transport: Arc<dyn PushTransport>,
    endpoints: Endpoints,
    channels: Mutex<HashMap<Topic, Arc<PushChannel>>>,
}

impl PushHub {
    pub fn new(transport: Arc<dyn PushTransport>, endpoints: Endpoints) -> Self {
        Self {
            transport,
            endpoints,
            channels: Mutex::new(HashMap::new()),
        }
    }

    pub fn channel(&self, topic: Topic) -> Result<Arc<PushChannel>> {
        let mut channels = self.channels.lock();
        if let Some(channel) = channels.get(&topic) {
            return Ok(channel.clone());
        }
        let url = topic.url(&self.endpoints)?;
        let channel = Arc::new(PushChannel::new(topic.clone(), url, self.transport.clone()));
        channels.insert(topic, channel.clone());
        Ok(channel)
    }

    pub fn case_channel(&self, case_id: &str) -> Result<Arc<PushChannel>> {
        self.channel(Topic::case(case_id)?)
    }

    pub fn notifications(&self) -> Result<Arc<PushChannel>> {
        self.channel(Topic::Notifications)
    }

    pub fn len(&self) -> usize {
        self.channels.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.lock().is_empty()
    }

    pub async fn disconnect_all(&self) {
        let channels: Vec<_> = self.channels.lock().values().cloned().collect();
        for channel in channels {
            channel.disconnect().await;
        }
    }
}
