use vantage_core::vk;

/// Converts a raw `vk::Result` into `anyhow::Result<()>`, logging and
/// aborting the process for the error classes spec.md §7 calls Fatal
/// (device lost, out of host/device memory, validation-layer failures).
/// `ERROR_OUT_OF_DATE_KHR` and `SUBOPTIMAL_KHR` are deliberately not
/// routed through here — callers on the swapchain path check those
/// codes themselves and return `bool` instead.
pub fn check(result: vk::Result) -> anyhow::Result<()> {
    match result {
        vk::Result::SUCCESS => Ok(()),
        vk::Result::ERROR_DEVICE_LOST => fatal(&format!("device lost: {result:?}")),
        vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
            fatal(&format!("out of memory: {result:?}"))
        }
        other => anyhow::bail!("vulkan call failed: {other:?}"),
    }
}

/// Logs `message` at error level and aborts the process. Used for the
/// Fatal error class in spec.md §7 — these are conditions the runtime
/// has no recovery path for.
pub fn fatal(message: &str) -> ! {
    log::error!("fatal: {message}");
    std::process::abort()
}

/// Like `fatal` but returns `anyhow::Result<T>` so it can be used at
/// call sites that still want `?` to type-check even though this path
/// never actually returns.
pub fn fatal_result<T>(message: &str) -> anyhow::Result<T> {
    fatal(message)
}
