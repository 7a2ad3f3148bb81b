//! Seams between a node supervisor and the plugins consuming its console
//! output.

use crate::plugin::{BlockStreamServer, ConsoleReader, MindReaderPlugin};
use scribe_lifecycle::ShutdownError;
use std::{fmt, sync::Arc};

/// Consumes raw console lines from a node supervisor.
pub trait LogPlugin: Send + Sync {
    /// Starts background work, if the plugin has any.
    fn launch(&self);

    /// Hands one console line to the plugin. Never drops input.
    fn log_line(&self, line: &str);

    /// Stops the plugin, carrying the cause when there is one.
    fn close(&self, err: Option<ShutdownError>);
}

/// Plugins that republish their blocks to a live stream server.
pub trait BlockStreamer {
    /// Starts the plugin with `server` receiving every archived block.
    fn run(&self, server: Arc<dyn BlockStreamServer>);
}

/// A [`LogPlugin`] built from a plain line callback; launch and close are
/// no-ops.
pub struct LogPluginFunc<F>(pub F);

impl<F> fmt::Debug for LogPluginFunc<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LogPluginFunc")
    }
}

impl<F: Fn(&str) + Send + Sync> LogPlugin for LogPluginFunc<F> {
    fn launch(&self) {}

    fn log_line(&self, line: &str) {
        (self.0)(line)
    }

    fn close(&self, _err: Option<ShutdownError>) {}
}

impl<CR: ConsoleReader> LogPlugin for Arc<MindReaderPlugin<CR>> {
    fn launch(&self) {}

    fn log_line(&self, line: &str) {
        MindReaderPlugin::log_line(self, line)
    }

    fn close(&self, err: Option<ShutdownError>) {
        MindReaderPlugin::close(self, err)
    }
}

impl<CR: ConsoleReader> BlockStreamer for Arc<MindReaderPlugin<CR>> {
    fn run(&self, server: Arc<dyn BlockStreamServer>) {
        MindReaderPlugin::run(self, Some(server))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn log_plugin_func_forwards_lines() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let plugin = LogPluginFunc(move |line: &str| sink.lock().push(line.to_string()));

        plugin.launch();
        plugin.log_line("first");
        plugin.log_line("second");
        plugin.close(None);

        assert_eq!(*seen.lock(), vec!["first", "second"]);
    }
}
