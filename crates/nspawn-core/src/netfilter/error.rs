use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetfilterError {
    #[error("no network interfaces configured")]
    NoInterfaces,
    #[error("failed to run iptables: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("iptables {args} exited with {code:?}: {stderr}")]
    Rule {
        args: String,
        code: Option<i32>,
        stderr: String,
    },
}
