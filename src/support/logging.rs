//-
// Copyright (c) 2020, 2024, Jason Lingle
//
// This file is part of Pigeonhole.
//
// Pigeonhole is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Pigeonhole is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for
// more details.
//
// You should have received a copy of the GNU General Public License along with
// Pigeonhole. If not, see <http://www.gnu.org/licenses/>.

//! Logger initialisation.
//!
//! Everything in the crate logs through the `log` facade. Embedders either
//! point us at a `log4rs` TOML file or take the simple stderr logger.

use std::path::Path;

use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;

use crate::support::error::Error;

const SIMPLE_PATTERN: &str = "{d(%H:%M:%S%.3f)} [{l}][{t}] {m}{n}";

/// Configure logging from a `log4rs` configuration file, typically named
/// `logging.toml`.
pub fn init_file_log(path: impl AsRef<Path>) -> Result<(), Error> {
    log4rs::init_file(path.as_ref(), log4rs::file::Deserializers::new())
        .map_err(|e| Error::BadConfig(format!("logging: {}", e)))
}

/// Log everything at `level` and above to stderr.
pub fn init_simple_log(level: LevelFilter) -> Result<(), Error> {
    let config = simple_config(level)?;
    log4rs::init_config(config)
        .map(|_| ())
        .map_err(|e| Error::BadConfig(format!("logging: {}", e)))
}

fn simple_config(level: LevelFilter) -> Result<Config, Error> {
    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new(SIMPLE_PATTERN)))
        .build();

    Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)))
        .build(Root::builder().appender("stderr").build(level))
        .map_err(|e| Error::BadConfig(format!("logging: {}", e)))
}
