use anyhow::{anyhow, Result};
use config::{Config, Environment, File, FileFormat};
use std::path::{Path, PathBuf};

use crate::PipelineConfig;

const CONFIG_FILE: &str = "icapture.toml";
const ENV_PREFIX: &str = "ICAPTURE";

/// 配置加载器
pub struct ConfigLoader {
    config_dir: PathBuf,
    env_prefix: String,
}

impl ConfigLoader {
    /// 创建配置加载器
    pub fn new<P: AsRef<Path>>(config_dir: P) -> Self {
        Self {
            config_dir: config_dir.as_ref().to_path_buf(),
            env_prefix: ENV_PREFIX.to_string(),
        }
    }

    /// 替换环境变量前缀
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    /// 加载配置：文件（可缺省）+ 环境变量覆盖，然后校验
    pub fn load(&self) -> Result<PipelineConfig> {
        let config = self.load_unvalidated()?;
        config.validate()?;
        Ok(config)
    }

    /// 加载但不校验
    pub fn load_unvalidated(&self) -> Result<PipelineConfig> {
        let config_path = self.config_path();
        let mut builder = Config::builder();

        // 配置文件不存在时使用默认配置
        if config_path.exists() {
            builder = builder.add_source(File::new(
                config_path.to_str().ok_or_else(|| anyhow!("Invalid config path"))?,
                FileFormat::Toml,
            ));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(&self.env_prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// 以 TOML 输出生效配置
    pub fn render(config: &PipelineConfig) -> Result<String> {
        Ok(toml::to_string_pretty(config)?)
    }
}
