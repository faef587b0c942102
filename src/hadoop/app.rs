//! MapReduce example applications runnable with `hades run-app`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::connection::shell_quote;

/// Queue used when none is given.
pub const DEFAULT_QUEUE: &str = "default";

/// Example jobs shipped in `hadoop-mapreduce-examples`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Application {
    /// Estimate pi with a quasi Monte Carlo method
    Pi,
    /// Count words of a generated input
    Wordcount,
    /// Sleep job holding containers for a while
    Sleep,
    /// Generate terasort input
    Teragen,
}

impl Application {
    /// Program name understood by the examples jar.
    pub fn program(&self) -> &'static str {
        match self {
            Application::Pi => "pi",
            Application::Wordcount => "wordcount",
            Application::Sleep => "sleep",
            Application::Teragen => "teragen",
        }
    }

    /// Arguments used when the user gives none.
    pub fn default_args(&self) -> String {
        let run = Utc::now().format("%Y%m%d%H%M%S");
        match self {
            Application::Pi => "10 100".to_string(),
            Application::Wordcount => format!(
                "/tmp/hades/wordcount/input /tmp/hades/wordcount/output-{}",
                run
            ),
            Application::Sleep => "-m 2 -r 1 -mt 5000 -rt 5000".to_string(),
            Application::Teragen => format!("100000 /tmp/hades/teragen-{}", run),
        }
    }

    /// Shell command submitting the job to `queue`.
    ///
    /// `args` replaces the default arguments. `examples_jar` may be a glob.
    pub fn command(&self, examples_jar: &str, queue: Option<&str>, args: Option<&str>) -> String {
        let queue = queue.unwrap_or(DEFAULT_QUEUE);
        let args = args
            .map(str::to_string)
            .unwrap_or_else(|| self.default_args());

        let mut command = String::new();
        if *self == Application::Wordcount && args.starts_with("/tmp/hades/wordcount/input") {
            // Seed the input directory so a bare `run-app wordcount` works.
            command.push_str(
                "hdfs dfs -mkdir -p /tmp/hades/wordcount/input && \
                 (hdfs dfs -test -e /tmp/hades/wordcount/input/LICENSE.txt || \
                 hdfs dfs -put \"$HADOOP_HOME\"/LICENSE.txt /tmp/hades/wordcount/input/) && ",
            );
        }
        command.push_str(&format!(
            "yarn jar {} {} -Dmapreduce.job.queuename={} {}",
            examples_jar,
            self.program(),
            shell_quote(queue),
            args
        ));
        command
    }
}

impl fmt::Display for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JAR: &str = "/opt/hadoop/share/hadoop/mapreduce/hadoop-mapreduce-examples-*.jar";

    #[test]
    fn test_pi_command_uses_queue() {
        let cmd = Application::Pi.command(JAR, Some("root.dev"), None);
        assert_eq!(
            cmd,
            format!("yarn jar {} pi -Dmapreduce.job.queuename=root.dev 10 100", JAR)
        );
    }

    #[test]
    fn test_custom_args_replace_defaults() {
        let cmd = Application::Sleep.command(JAR, None, Some("-m 1 -r 0"));
        assert!(cmd.ends_with("sleep -Dmapreduce.job.queuename=default -m 1 -r 0"));
    }

    #[test]
    fn test_wordcount_seeds_input() {
        let cmd = Application::Wordcount.command(JAR, None, None);
        assert!(cmd.starts_with("hdfs dfs -mkdir -p /tmp/hades/wordcount/input"));
        assert!(cmd.contains("wordcount -Dmapreduce.job.queuename=default"));
    }
}
