/// Turns a per-scope `Result` into an `Option`, logging the error on the way.
///
/// Failures routed through here are routine (a job ended between listing and reading its
/// cgroup), so they are logged at `debug` level.
pub trait ResultOkLogExt<T, E> {
    fn ok_log(self, scope: &str) -> Option<T>;
}

impl<T, E> ResultOkLogExt<T, E> for std::result::Result<T, E>
where
    E: std::error::Error,
{
    fn ok_log(self, scope: &str) -> Option<T> {
        match self {
            Ok(ok) => Some(ok),
            Err(err) => {
                log::debug!(target: "cgroup collector", "skipping scope `{scope}`: {err}");
                None
            }
        }
    }
}
