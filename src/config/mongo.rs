use serde::Deserialize;
use std::time::Duration;

fn default_poll_interval_ms() -> u64 {
    500
}

#[derive(Debug, Clone, Deserialize)]
pub struct Mongo {
    url: String,
    database: String,

    /// change stream에 새 이벤트가 없을 때 다시 확인 하기까지 기다리는 시간(밀리초)
    #[serde(default = "default_poll_interval_ms")]
    poll_interval_ms: u64,
}

impl Mongo {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
