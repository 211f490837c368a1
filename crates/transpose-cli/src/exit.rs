//! Process exit codes.

use transpose_vulkan::VulkanError;

pub const EXIT_SUCCESS: i32 = 0;
/// Bad arguments or configuration.
pub const EXIT_USAGE: i32 = 1;

/// Exit code for a failed GPU run: the Vulkan status behind the error.
pub fn vulkan_failure(err: &VulkanError) -> i32 {
    match err.code() {
        // Never report success for a failure.
        0 => EXIT_USAGE,
        code => code,
    }
}

/// Exit code for any error reaching `main`.
pub fn for_error(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<VulkanError>().map_or(EXIT_USAGE, vulkan_failure)
}

/// One-line failure summary with the exit code, followed by the cause chain.
pub fn describe_failure(err: &anyhow::Error, code: i32) -> String {
    let mut text = format!("{err} (exit code {code})");
    for cause in err.chain().skip(1) {
        text.push_str("\n  Caused by: ");
        text.push_str(&cause.to_string());
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_description_lists_causes() {
        let err =
            anyhow::Error::new(VulkanError::NoDeviceFound).context("creating device context");
        let code = for_error(&err);
        let expected = format!(
            "creating device context (exit code -4)\n  Caused by: {}",
            VulkanError::NoDeviceFound
        );
        assert_eq!(describe_failure(&err, code), expected);
    }

    #[test]
    fn configuration_errors_exit_one() {
        let err = anyhow::anyhow!("Invalid log level 'loud'");
        assert_eq!(for_error(&err), EXIT_USAGE);
    }

    #[test]
    fn vulkan_errors_keep_their_status() {
        let err = anyhow::Error::new(VulkanError::NoDeviceFound);
        assert_eq!(for_error(&err), -4);
        let err = anyhow::Error::new(VulkanError::UnknownVariant(7)).context("building kernels");
        assert_eq!(for_error(&err), -3);
    }
}
