//! Shell command lines issued by the gateway, and parsing of their output.

use protocol::GatewayError;

use crate::remote::CommandOutput;

/// Quote an argument for a POSIX shell.
pub fn shell_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}

fn quote_all<S: AsRef<str>>(args: &[S]) -> String {
    args.iter()
        .map(|a| shell_quote(a.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// `du -sh <path>`
pub fn du(path: &str) -> String {
    format!("du -sh {}", shell_quote(path))
}

/// `stat -L <path>` (follows symlinks).
pub fn stat(path: &str) -> String {
    format!("stat -L {}", shell_quote(path))
}

/// `rm -rf p1 p2 ...`
pub fn remove<S: AsRef<str>>(paths: &[S]) -> String {
    format!("rm -rf {}", quote_all(paths))
}

/// `cp -r p1 p2 ... <to>`
pub fn copy<S: AsRef<str>>(paths: &[S], to: &str) -> String {
    format!("cp -r {} {}", quote_all(paths), shell_quote(to))
}

/// `mv p1 p2 ... <to>`
pub fn mv<S: AsRef<str>>(paths: &[S], to: &str) -> String {
    format!("mv {} {}", quote_all(paths), shell_quote(to))
}

/// Extract the size field from `du -sh` output.
///
/// `du` exits non-zero when it trips over entries that vanish mid-walk
/// (`/proc/<pid>/fd/*` and friends) but still prints the summary as its last
/// line:
///
/// ```text
/// du: cannot access '/proc/19087/fd/3': No such file or directory
/// 18G	/
/// ```
///
/// On failure with output, the second-to-last line (the last is the empty
/// remainder after the trailing newline) is taken as the summary, and must
/// contain a tab between size and path. Only one trailing empty line is
/// skipped: output that ends in several blank lines is reported as an error.
pub fn parse_du_output(command: &str, result: &CommandOutput) -> Result<String, GatewayError> {
    let summary = if result.success() {
        result.output.as_str()
    } else {
        if result.output.is_empty() {
            return Err(GatewayError::RemoteCommand {
                command: command.to_string(),
                output: format!("exit status {}", result.exit_status),
            });
        }
        let lines: Vec<&str> = result.output.split('\n').collect();
        let line = if lines.len() >= 2 {
            lines[lines.len() - 2]
        } else {
            ""
        };
        if !line.contains('\t') {
            return Err(GatewayError::RemoteCommand {
                command: command.to_string(),
                output: result.output.clone(),
            });
        }
        line
    };

    // "32K\t/tmp\n" -> "32K"
    let size = summary.split('\t').next().unwrap_or_default().trim();
    Ok(size.to_string())
}
