//! Logging macros
//!
//! - `board` feature: forwarded to `defmt` (RTT transport in the firmware)
//! - host unit tests: `println!`
//! - anything else: arguments are type-checked and dropped
//!
//! Only `{}` and `{:?}` placeholders are portable across all three.

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {{
        #[cfg(feature = "board")]
        ::defmt::info!($($arg)*);

        #[cfg(all(not(feature = "board"), test))]
        println!("[INFO] {}", format!($($arg)*));

        #[cfg(all(not(feature = "board"), not(test)))]
        let _ = format_args!($($arg)*);
    }};
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {{
        #[cfg(feature = "board")]
        ::defmt::warn!($($arg)*);

        #[cfg(all(not(feature = "board"), test))]
        println!("[WARN] {}", format!($($arg)*));

        #[cfg(all(not(feature = "board"), not(test)))]
        let _ = format_args!($($arg)*);
    }};
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {{
        #[cfg(feature = "board")]
        ::defmt::error!($($arg)*);

        #[cfg(all(not(feature = "board"), test))]
        eprintln!("[ERROR] {}", format!($($arg)*));

        #[cfg(all(not(feature = "board"), not(test)))]
        let _ = format_args!($($arg)*);
    }};
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {{
        #[cfg(feature = "board")]
        ::defmt::debug!($($arg)*);

        #[cfg(all(not(feature = "board"), test))]
        println!("[DEBUG] {}", format!($($arg)*));

        #[cfg(all(not(feature = "board"), not(test)))]
        let _ = format_args!($($arg)*);
    }};
}
