//! Entry point of the `triggerbench` invoker server.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

fn main() -> anyhow::Result<()> {
    triggerbench_server::cli::execute()
}
