/// Numbered step log for one operation (`[prefix] [step N] ...`).
/// Silent unless detailed logging is enabled in the config.
#[derive(Debug)]
pub struct Steps {
    prefix: String,
    step: u32,
    verbose: bool,
}

impl Steps {
    pub fn new(prefix: impl Into<String>, verbose: bool) -> Self {
        Self {
            prefix: prefix.into(),
            step: 1,
            verbose,
        }
    }

    pub fn info(&mut self, message: impl AsRef<str>) {
        if let Some(line) = self.next_line(message.as_ref()) {
            tracing::info!(target: "weibo_relay::steps", "{line}");
        }
    }

    pub fn warn(&mut self, message: impl AsRef<str>) {
        if let Some(line) = self.next_line(message.as_ref()) {
            tracing::warn!(target: "weibo_relay::steps", "{line}");
        }
    }

    fn next_line(&mut self, message: &str) -> Option<String> {
        if !self.verbose {
            return None;
        }
        let line = format!("[{}] [step {}] {}", self.prefix, self.step, message);
        self.step += 1;
        Some(line)
    }
}
