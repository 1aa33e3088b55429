//! Declarative macros for module development.

/// Export the module record that identifies this module to the host.
///
/// Exactly one invocation per module. The record is placed in its own link
/// section and marked `#[used]` so the linker keeps it even though nothing in
/// the module references it.
///
/// # Example
///
/// ```rust,ignore
/// plugrack_sdk::declare_module! {
///     full_type: "checkpoint/blcr",
///     plugin_id: 101,
///     version: "1.0.0",
///     requires: ">=0.6",
///     name: "Berkeley Lab Checkpoint/Restart",
/// }
///
/// #[no_mangle]
/// pub extern "C" fn checkpoint_init() -> std::os::raw::c_int {
///     plugrack_sdk::status::SUCCESS
/// }
/// ```
#[macro_export]
macro_rules! declare_module {
    (
        full_type: $full_type:expr,
        plugin_id: $plugin_id:expr,
        version: $version:expr,
        requires: $requires:expr,
        name: $name:expr $(,)?
    ) => {
        #[used]
        #[no_mangle]
        #[cfg_attr(target_os = "linux", link_section = ".plugrack")]
        #[cfg_attr(target_os = "macos", link_section = "__DATA,__plugrack")]
        pub static PLUGRACK_MODULE_RECORD: [u8; $crate::record::RECORD_LEN] =
            $crate::record::encode($full_type, $plugin_id, $version, $requires, $name);
    };
    (
        full_type: $full_type:expr,
        version: $version:expr $(,)?
    ) => {
        $crate::declare_module! {
            full_type: $full_type,
            plugin_id: 0,
            version: $version,
            requires: "*",
            name: $full_type,
        }
    };
}

#[cfg(test)]
mod tests {
    mod declared {
        crate::declare_module! {
            full_type: "checkpoint/none",
            plugin_id: 2,
            version: "0.1.0",
            requires: "*",
            name: "No-op checkpoint",
        }
    }

    #[test]
    fn test_declared_record_decodes() {
        let record = crate::ModuleRecord::decode(&declared::PLUGRACK_MODULE_RECORD).unwrap();
        assert_eq!(record.full_type, "checkpoint/none");
        assert_eq!(record.plugin_id, 2);
        assert_eq!(record.name, "No-op checkpoint");
    }
}
