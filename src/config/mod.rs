mod event;
mod mongo;
pub mod log;

pub use event::Event;
pub use mongo::Mongo;

use crate::item::StoreError;
use mongodb::sync::{Client, Database};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    mongo: Mongo,
    logger: log::Config,

    #[serde(default)]
    event: Event,
}

impl AppConfig {
    pub fn mongo(&self) -> &Mongo {
        &self.mongo
    }

    pub fn logger(&self) -> &log::Config {
        &self.logger
    }

    pub fn event(&self) -> &Event {
        &self.event
    }
}

fn run_mode() -> String {
    env::var("RUN_MODE").unwrap_or_else(|_| "development".into())
}

/// 실행 환경에 따라 .env 파일을 로드한다.
pub fn load_dotenv() {
    let env_filename = env::var("RUN_MODE")
        .map(|env| format!(".env.{}", env))
        .unwrap_or_else(|_| ".env".into());

    dotenvy::from_filename(env_filename).ok();
}

/// `config/{RUN_MODE}.json` 파일을 읽는다. `BOOK_SWAP__MONGO__URL` 처럼 `BOOK_SWAP__` 으로 시작하는 환경 변수가 파일의 값을 덮어쓴다.
pub fn load_config() -> Result<AppConfig, ::config::ConfigError> {
    let config = ::config::Config::builder()
        .add_source(::config::File::with_name(&format!("config/{}.json", run_mode())))
        .add_source(
            ::config::Environment::with_prefix("BOOK_SWAP")
                .separator("__")
                .try_parsing(true)
        )
        .build()?;

    config.try_deserialize()
}

pub fn connect_to_mongo(mongo: &Mongo) -> Result<Database, StoreError> {
    let client = Client::with_uri_str(mongo.url())
        .map_err(|e| StoreError::Connect(e.to_string()))?;

    Ok(client.database(mongo.database()))
}
