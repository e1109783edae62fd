// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::flexi_logger::{
    Logger,
    LoggerHandle,
};
use ::std::{
    mem,
    sync::Once,
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Log specification used when `RUST_LOG` is not set.
const DEFAULT_LOG_SPEC: &str = "warn";

//======================================================================================================================
// Static Variables
//======================================================================================================================

/// Guardian to the logging initialize function.
static INIT_LOG: Once = Once::new();

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Initializes logging features. The log specification is read from the `RUST_LOG` environment variable.
pub fn initialize() {
    INIT_LOG.call_once(|| {
        match Logger::try_with_env_or_str(DEFAULT_LOG_SPEC).and_then(|logger: Logger| logger.start()) {
            // The logger stops when its handle is dropped, so it lives for the rest of the process.
            Ok(handle) => mem::forget::<LoggerHandle>(handle),
            Err(e) => eprintln!("initialize(): failed to start logger ({:?})", e),
        }
    });
}
