use {anyhow::Result, async_trait::async_trait};

/// External conversational surface a binding manager talks to.
///
/// Platform adapters (Slack, Discord, ...) provide the concrete
/// implementation; the manager only creates threads and posts the
/// intro/farewell messages through it.
#[async_trait]
pub trait ThreadSurface: Send + Sync {
    /// Create a thread in the given channel and return its platform id.
    async fn create_thread(&self, channel_id: &str, name: &str) -> Result<String>;

    /// Post a message into a thread.
    async fn send_message(&self, channel_id: &str, thread_id: &str, text: &str) -> Result<()>;
}

/// Surface for accounts whose platform has no thread support.
pub struct NoopThreadSurface;

#[async_trait]
impl ThreadSurface for NoopThreadSurface {
    async fn create_thread(&self, _channel_id: &str, _name: &str) -> Result<String> {
        Err(anyhow::anyhow!("thread surface not configured"))
    }

    async fn send_message(&self, _channel_id: &str, _thread_id: &str, _text: &str) -> Result<()> {
        Ok(())
    }
}
