// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::path::Path;

use serde::Deserialize;

use super::{AppError, AppResult};
use crate::network::ConnectionInfo;

/// Prefix of environment variables overriding the config file, e.g.
/// `NETSERVE__SERVER__PORT=5667`.
pub const ENV_PREFIX: &str = "NETSERVE";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub directory: String,
    pub file_prefix: String,
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            directory: "logs".to_string(),
            file_prefix: "netserve.log".to_string(),
            ansi: true,
        }
    }
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub server: ConnectionInfo,
    pub log: LogConfig,
}

impl ServerSettings {
    pub fn set_up_config<P: AsRef<Path>>(path: P) -> AppResult<ServerSettings> {
        let path_str = path
            .as_ref()
            .to_str()
            .ok_or_else(|| {
                AppError::InvalidConfig(format!(
                    "config file path: {}",
                    path.as_ref().to_string_lossy()
                ))
            })?;
        let config = config::Config::builder()
            .add_source(config::File::with_name(path_str))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let settings: ServerSettings = config.try_deserialize()?;
        settings.server.validate()?;
        Ok(settings)
    }
}
