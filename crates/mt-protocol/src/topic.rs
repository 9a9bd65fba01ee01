//! Topic names derived from the device name

use std::fmt;

/// Input and output topics for one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    /// Topic carrying keystrokes and resize events to the shell
    pub input: String,
    /// Topic carrying shell output
    pub output: String,
}

impl Topics {
    /// Derive `/shell/{name}/input` and `/shell/{name}/output`
    pub fn for_device(name: &str) -> Self {
        Self {
            input: format!("/shell/{}/input", name),
            output: format!("/shell/{}/output", name),
        }
    }
}

impl fmt::Display for Topics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.input, self.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topics_for_device() {
        let topics = Topics::for_device("pi-01");
        assert_eq!(topics.input, "/shell/pi-01/input");
        assert_eq!(topics.output, "/shell/pi-01/output");
    }
}
