use super::filesystem::{FakeFilesystem, HOME_DIR, USERNAME};
use crate::configuration::types::OsProfile;
use log::trace;
use std::sync::Arc;

const HELP_TEXT: &str = "GNU bash, version 5.0.17(1)-release (x86_64-pc-linux-gnu)\n\
These shell commands are defined internally.  Type `help' to see this list.\n\
\n ls\n pwd\n whoami\n uname\n cat\n id\n exit\n";

/// Outcome of one interpreted command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellResponse {
    /// Text to send back, `\n` separated. Empty for blank input.
    Output(String),
    /// The caller should end the session.
    Exit,
}

/// Per-session shell state, owned by the handler driving the session.
#[derive(Debug, Clone)]
pub struct ShellState {
    pub cwd: String,
    pub username: String,
    pub hostname: String,
    pub profile: OsProfile,
}

/// Command interpreter shared by the Telnet and SSH handlers.
pub struct FakeShell {
    state: ShellState,
    filesystem: Arc<FakeFilesystem>,
}

impl FakeShell {
    pub fn new(filesystem: Arc<FakeFilesystem>, profile: OsProfile) -> Self {
        let hostname = filesystem.image(profile).hostname.to_string();
        Self {
            state: ShellState {
                cwd: HOME_DIR.to_string(),
                username: USERNAME.to_string(),
                hostname,
                profile,
            },
            filesystem,
        }
    }

    pub fn state(&self) -> &ShellState {
        &self.state
    }

    pub fn prompt(&self) -> String {
        format!(
            "{}@{}:{}$ ",
            self.state.username, self.state.hostname, self.state.cwd
        )
    }

    pub fn handle(&self, line: &str) -> ShellResponse {
        let mut parts = line.split_whitespace();
        let cmd = match parts.next() {
            Some(cmd) => cmd,
            None => return ShellResponse::Output(String::new()),
        };
        let args: Vec<&str> = parts.collect();
        trace!("shell verb {:?} with {} args", cmd, args.len());

        let output = match cmd {
            "pwd" => format!("{}\n", self.state.cwd),
            "whoami" => format!("{}\n", self.state.username),
            "id" => String::from("uid=1000(admin) gid=1000(admin) groups=1000(admin)\n"),
            "uname" => self.uname(&args),
            "ls" => self.ls(&args),
            "cat" => self.cat(&args),
            "help" => String::from(HELP_TEXT),
            "exit" => return ShellResponse::Exit,
            other => format!("{}: command not found\n", other),
        };
        ShellResponse::Output(output)
    }

    fn uname(&self, args: &[&str]) -> String {
        if args.contains(&"-a") {
            let image = self.filesystem.image(self.state.profile);
            format!(
                "Linux {} {} x86_64 x86_64 x86_64 GNU/Linux\n",
                self.state.hostname, image.kernel_banner
            )
        } else {
            String::from("Linux\n")
        }
    }

    fn ls(&self, args: &[&str]) -> String {
        let image = self.filesystem.image(self.state.profile);
        let target = args.iter().find(|a| !a.starts_with('-'));
        let path = match target {
            Some(t) => self.resolve(t),
            None => self.state.cwd.clone(),
        };

        if let Some(entries) = image.list(&path) {
            return format!("{}\n", entries.join("  "));
        }
        match target {
            Some(t) if image.read(&path).is_some() => format!("{}\n", t),
            Some(t) => format!("ls: cannot access '{}': No such file or directory\n", t),
            None => String::from("\n"),
        }
    }

    fn cat(&self, args: &[&str]) -> String {
        let target = match args.first() {
            Some(t) => *t,
            None => return String::from("cat: missing operand\n"),
        };
        let path = self.resolve(target);
        match self.filesystem.image(self.state.profile).read(&path) {
            Some(content) => content.to_string(),
            None => format!("cat: {}: No such file or directory\n", target),
        }
    }

    /// Absolute path for `target`, relative ones joined to the cwd, separator runs collapsed.
    fn resolve(&self, target: &str) -> String {
        let joined = if target.starts_with('/') {
            target.to_string()
        } else {
            format!("{}/{}", self.state.cwd, target)
        };

        let mut path = String::with_capacity(joined.len());
        for c in joined.chars() {
            if c == '/' && path.ends_with('/') {
                continue;
            }
            path.push(c);
        }
        if path.len() > 1 && path.ends_with('/') {
            path.pop();
        }
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell(profile: OsProfile) -> FakeShell {
        FakeShell::new(Arc::new(FakeFilesystem::load()), profile)
    }

    fn output(shell: &FakeShell, line: &str) -> String {
        match shell.handle(line) {
            ShellResponse::Output(o) => o,
            ShellResponse::Exit => panic!("unexpected exit for {:?}", line),
        }
    }

    #[test]
    fn test_cat() {
        let sh = shell(OsProfile::Ubuntu);
        assert!(output(&sh, "cat /etc/passwd").contains("root:x:0:0"));
        assert!(output(&sh, "cat //etc///passwd").contains("root:x:0:0"));
        assert!(output(&sh, "cat notes.txt").contains("backup the database"));
        assert!(output(&sh, "cat .ssh/id_rsa").contains("FAKE UBUNTU KEY"));
        assert_eq!(
            output(&sh, "cat missing.txt"),
            "cat: missing.txt: No such file or directory\n"
        );
        assert_eq!(output(&sh, "cat"), "cat: missing operand\n");
    }

    #[test]
    fn test_ls() {
        let sh = shell(OsProfile::Ubuntu);
        assert_eq!(output(&sh, "ls"), "notes.txt  .ssh\n");
        assert_eq!(output(&sh, "ls -la"), "notes.txt  .ssh\n");
        assert_eq!(output(&sh, "ls /etc/"), "passwd  shadow  hosts  os-release\n");
        assert!(output(&sh, "ls /").starts_with("bin  boot  dev"));
        assert!(output(&sh, "ls /opt").contains("cannot access '/opt'"));

        let sh = shell(OsProfile::Fedora);
        assert_eq!(output(&sh, "ls"), "todo.txt  .ssh\n");
    }

    #[test]
    fn test_identity_commands() {
        let sh = shell(OsProfile::Fedora);
        assert_eq!(output(&sh, "pwd"), "/home/admin\n");
        assert_eq!(output(&sh, "whoami"), "admin\n");
        assert_eq!(
            output(&sh, "id"),
            "uid=1000(admin) gid=1000(admin) groups=1000(admin)\n"
        );
        assert_eq!(output(&sh, "uname"), "Linux\n");
        assert!(output(&sh, "uname -a")
            .starts_with("Linux localhost.localdomain 5.11.12-300.fc34.x86_64"));
        assert_eq!(sh.prompt(), "admin@localhost.localdomain:/home/admin$ ");
    }

    #[test]
    fn test_unknown_empty_and_exit() {
        let sh = shell(OsProfile::Ubuntu);
        assert_eq!(output(&sh, "foobar"), "foobar: command not found\n");
        assert_eq!(output(&sh, "   "), "");
        assert!(output(&sh, "help").starts_with("GNU bash, version 5.0.17"));
        assert_eq!(sh.handle("exit"), ShellResponse::Exit);
        assert_eq!(sh.handle("  exit  "), ShellResponse::Exit);
    }
}
