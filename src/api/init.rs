//! Initialization funcs set up the core's runtime environment, including:
//! 1. override global config, from manual config or yaml file or env variable
//! 2. initialize the global logger
//! 3. start the cached time ticker when configured

use crate::{config, config::ConfigEntity, utils, Result};

/// `init_default` initializes the core using the configuration from the
/// system environment and the default values.
#[inline]
pub fn init_default() -> Result<()> {
    init_core(&mut String::new())
}

/// `init_with_config` initializes the core using the given config entity.
#[inline]
pub fn init_with_config(config_entity: ConfigEntity) -> Result<()> {
    config_entity.check()?;
    config::reset_global_config(config_entity);
    config::override_config_from_env_and_init_log()?;
    init_core_components()
}

/// `init_with_config_file` loads general configuration from the given
/// YAML file and initializes the core.
#[inline]
pub fn init_with_config_file(config_path: &mut String) -> Result<()> {
    init_core(config_path)
}

#[inline]
fn init_core(config_path: &mut String) -> Result<()> {
    // A blank path resolves through the env variable and falls back to
    // the built-in defaults.
    config::init_config_with_yaml(config_path)?;
    init_core_components()
}

// `init_core_components` init core components with global config
#[inline]
fn init_core_components() -> Result<()> {
    if config::use_cache_time() {
        utils::start_time_ticker();
    }
    Ok(())
}
