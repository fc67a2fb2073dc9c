// Copyright 2024 - developers of the `molniya` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

/// Per-connection configuration.
///
/// The device and language fields travel in `initConnection`, which is
/// wrapped around the first request of a connection whenever `api_id`
/// is set. The defaults describe the host system.
#[derive(Clone)]
pub struct Configuration {
    /// The API identifier obtained from my.telegram.org. A value of
    /// zero disables the `initConnection` wrapping entirely.
    pub api_id: i32,

    pub device_model: String,
    pub system_version: String,
    pub app_version: String,
    pub system_lang_code: String,
    pub lang_code: String,

    /// `FLOOD_WAIT` errors asking for at most this many seconds are
    /// slept through and retried automatically; zero disables the
    /// behaviour and every flood error is surfaced.
    pub flood_sleep_threshold: u32,
}

const DEFAULT_LOCALE: &str = "en";

/// Sleeping for more than a minute on a flood wait rarely is what the
/// caller wants; longer asks are surfaced by default.
const DEFAULT_FLOOD_SLEEP_THRESHOLD: u32 = 60;

impl Default for Configuration {
    fn default() -> Self {
        let info = os_info::get();

        let mut system_lang_code = locate_locale::system();
        let mut lang_code = locate_locale::user();
        if system_lang_code.is_empty() {
            system_lang_code.push_str(DEFAULT_LOCALE);
        }
        if lang_code.is_empty() {
            lang_code.push_str(DEFAULT_LOCALE);
        }

        Self {
            api_id: 0,
            device_model: format!("{} {}", info.os_type(), info.bitness()),
            system_version: info.version().to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            system_lang_code,
            lang_code,
            flood_sleep_threshold: DEFAULT_FLOOD_SLEEP_THRESHOLD,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_filled_in() {
        let config = Configuration::default();
        assert_eq!(config.api_id, 0);
        assert!(!config.device_model.is_empty());
        assert!(!config.system_lang_code.is_empty());
        assert!(!config.lang_code.is_empty());
    }
}
