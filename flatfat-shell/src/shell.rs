use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use flatfat::path::{PathKind, Resolved, resolve, split_parent};
use flatfat::volume::{BootSector, DirEntry};
use flatfat::{ClusterError, ClusterId, FileSystem};

use crate::command::Command;
use crate::error::{Error, Result};

/// Length `short` cuts files down to.
const SHORT_LEN: usize = 3000;
const MAX_SCRIPT_DEPTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Interactive front end over one image file.
///
/// Starts unmounted when the image does not exist yet; `format` creates it.
pub struct Shell<W> {
    image: PathBuf,
    fs: Option<FileSystem<File>>,
    cwd: ClusterId,
    /// Names from root down to `cwd`
    cwd_path: Vec<String>,
    depth: usize,
    out: W,
}

impl<W: Write> Shell<W> {
    pub fn open(image: PathBuf, out: W) -> io::Result<Self> {
        let fs = if image.exists() {
            let file = OpenOptions::new().read(true).write(true).open(&image)?;
            match FileSystem::mount(file) {
                Ok(fs) => Some(fs),
                Err(e) => {
                    log::warn!("{} is not a usable image: {e}", image.display());
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            image,
            fs,
            cwd: ClusterId::ROOT,
            cwd_path: Vec::new(),
            depth: 0,
            out,
        })
    }

    pub fn is_mounted(&self) -> bool {
        self.fs.is_some()
    }

    pub fn pwd(&self) -> String {
        format!("/{}", self.cwd_path.join("/"))
    }

    pub fn prompt(&self) -> String {
        format!("{}$ ", self.pwd())
    }

    /// Reads commands from `input` until it ends or a command exits.
    pub fn run<R: BufRead>(&mut self, input: R) -> io::Result<()> {
        let mut lines = input.lines();
        loop {
            let prompt = self.prompt();
            write!(self.out, "{prompt}")?;
            self.out.flush()?;

            let Some(line) = lines.next().transpose()? else {
                writeln!(self.out)?;
                return Ok(());
            };
            if self.run_line(&line)? == Flow::Exit {
                return Ok(());
            }
        }
    }

    pub fn run_script(&mut self, script: &Path) -> io::Result<Flow> {
        self.report(|shell| shell.load(script))
    }

    /// Runs one line; only failures of the image handle or of the output are returned.
    pub fn run_line(&mut self, line: &str) -> io::Result<Flow> {
        if line.trim().is_empty() {
            return Ok(Flow::Continue);
        }
        self.report(|shell| {
            let command = line.parse::<Command>()?;
            shell.execute(command)
        })
    }

    fn report(&mut self, f: impl FnOnce(&mut Self) -> Result<Flow>) -> io::Result<Flow> {
        match f(self) {
            Ok(flow) => Ok(flow),
            Err(Error::Io(e)) => Err(e),
            Err(e) => {
                log::error!("{e}");
                writeln!(self.out, "{e}")?;
                Ok(Flow::Continue)
            }
        }
    }

    pub fn execute(&mut self, command: Command) -> Result<Flow> {
        let mutates = command.mutates();
        match command {
            Command::Format { size } => self.format(size)?,
            Command::Ls { path } => self.ls(path.as_deref().unwrap_or("."))?,
            Command::Cat { path } => {
                let file = self.resolve(&path, PathKind::File)?;
                let content = self.fs()?.read_file(&file.entry)?;
                self.out.write_all(&content)?;
                if !content.ends_with(b"\n") {
                    writeln!(self.out)?;
                }
            }
            Command::Cd { path } => {
                let dir = self.resolve(&path, PathKind::Dir)?;
                self.cwd = dir.entry.start_cluster();
                self.rebuild_cwd_path()?;
            }
            Command::Pwd => {
                self.fs()?;
                let pwd = self.pwd();
                writeln!(self.out, "{pwd}")?;
            }
            Command::Mkdir { path } => {
                let (parent, name) = self.parent_of(&path)?;
                self.fs()?.create_dir_entry(parent, &name, false, b"")?;
            }
            Command::Rmdir { path } => {
                let dir = self.resolve(&path, PathKind::Dir)?;
                if dir.entry.start_cluster() == self.cwd {
                    return Err(Error::Busy);
                }
                self.remove(&dir)?;
            }
            Command::Rm { path } => {
                let file = self.resolve(&path, PathKind::File)?;
                self.remove(&file)?;
            }
            Command::Cp { src, dst } => {
                let src = self.resolve(&src, PathKind::File)?;
                let (parent, name) = self.destination(&dst, &src.entry.name())?;
                self.fs()?.copy_dir_entry(parent, &src.entry, &name)?;
            }
            Command::Mv { src, dst } => {
                let src = self.resolve(&src, PathKind::Both)?;
                let position = src.position.ok_or(flatfat::Error::InvalidName)?;
                let (parent, name) = self.destination(&dst, &src.entry.name())?;
                let moved = self
                    .fs()?
                    .move_dir_entry(src.parent, position, parent, &name)?;
                if moved.is_dir() {
                    self.rebuild_cwd_path()?;
                }
            }
            Command::Incp { host, path } => {
                let (parent, name) = self.parent_of(&path)?;
                let content = fs::read(&host).map_err(Error::host(&host))?;
                self.fs()?.create_dir_entry(parent, &name, true, &content)?;
            }
            Command::Outcp { path, host } => {
                let file = self.resolve(&path, PathKind::File)?;
                let content = self.fs()?.read_file(&file.entry)?;
                fs::write(&host, content).map_err(Error::host(&host))?;
            }
            Command::Xcp { first, second, dst } => {
                let first = self.resolve(&first, PathKind::File)?;
                let second = self.resolve(&second, PathKind::File)?;
                let (parent, name) = self.parent_of(&dst)?;

                let fs = self.fs()?;
                let mut content = fs.read_file(&first.entry)?;
                content.extend(fs.read_file(&second.entry)?);
                fs.create_dir_entry(parent, &name, true, &content)?;
            }
            Command::Info { path } => self.info(&path)?,
            Command::Short { path } => {
                let file = self.resolve(&path, PathKind::File)?;
                let position = file.position.ok_or(flatfat::Error::InvalidName)?;
                self.fs()?.truncate_file(file.parent, position, SHORT_LEN)?;
            }
            Command::Load { script } => {
                if self.load(&script)? == Flow::Exit {
                    return Ok(Flow::Exit);
                }
            }
            Command::Exit => return Ok(Flow::Exit),
        }

        if mutates {
            writeln!(self.out, "OK")?;
        }
        Ok(Flow::Continue)
    }

    fn format(&mut self, size: u32) -> Result<()> {
        let bs = BootSector::new(size)?;

        self.fs = None;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.image)?;
        file.set_len(u64::from(size))?;

        self.fs = Some(FileSystem::format_with(file, bs)?);
        self.cwd = ClusterId::ROOT;
        self.cwd_path.clear();
        Ok(())
    }

    fn ls(&mut self, path: &str) -> Result<()> {
        let dir = self.resolve(path, PathKind::Dir)?;
        let entries = self.fs()?.read_dir(&dir.entry)?;
        for entry in entries {
            if entry.is_dir() {
                writeln!(self.out, "{:<13} <DIR>", entry.name())?;
            } else {
                writeln!(self.out, "{:<13} {}", entry.name(), entry.size())?;
            }
        }
        Ok(())
    }

    fn info(&mut self, path: &str) -> Result<()> {
        let target = self.resolve(path, PathKind::Both)?;
        let clusters = self.fs()?.cluster_locations(&target.entry)?;
        let list: Vec<String> = clusters.iter().map(ToString::to_string).collect();
        // The root is only known by its own `.` record.
        let name = match target.position {
            Some(_) => target.entry.name(),
            None => "/".to_owned(),
        };
        writeln!(
            self.out,
            "{} {} B in {} cluster(s): {}",
            name,
            target.entry.size(),
            clusters.len(),
            list.join(" ")
        )?;
        if target.position.is_none() {
            let free = self.fs()?.free_clusters();
            writeln!(self.out, "{free} free cluster(s)")?;
        }
        Ok(())
    }

    fn load(&mut self, script: &Path) -> Result<Flow> {
        if self.depth >= MAX_SCRIPT_DEPTH {
            return Err(Error::ScriptDepth);
        }
        let text = fs::read_to_string(script).map_err(Error::host(script))?;

        self.depth += 1;
        let flow = self.replay(&text);
        self.depth -= 1;
        flow
    }

    fn replay(&mut self, text: &str) -> Result<Flow> {
        for line in text.lines().filter(|line| !line.trim().is_empty()) {
            let prompt = self.prompt();
            writeln!(self.out, "{prompt}{line}")?;
            if self.run_line(line)? == Flow::Exit {
                return Ok(Flow::Exit);
            }
        }
        Ok(Flow::Continue)
    }

    fn fs(&mut self) -> Result<&mut FileSystem<File>> {
        self.fs.as_mut().ok_or(Error::Unmounted)
    }

    fn resolve(&mut self, path: &str, kind: PathKind) -> Result<Resolved> {
        let cwd = self.cwd;
        Ok(resolve(self.fs()?, cwd, path, kind)?)
    }

    /// Directory that will hold `path`, and the last component as the new name.
    fn parent_of(&mut self, path: &str) -> Result<(ClusterId, String)> {
        let (parent, name) = split_parent(path);
        let parent = if parent.is_empty() { "." } else { parent };
        let dir = self.resolve(parent, PathKind::Dir)?;
        Ok((dir.entry.start_cluster(), name.to_owned()))
    }

    /// An existing directory receives the entry as `name`, anything else names the entry itself.
    fn destination(&mut self, dst: &str, name: &str) -> Result<(ClusterId, String)> {
        match self.resolve(dst, PathKind::Both) {
            Ok(dir) if dir.entry.is_dir() => Ok((dir.entry.start_cluster(), name.to_owned())),
            _ => self.parent_of(dst),
        }
    }

    fn remove(&mut self, target: &Resolved) -> Result<()> {
        // The root has no slot in any directory.
        let position = target.position.ok_or(flatfat::Error::InvalidName)?;
        self.fs()?.remove_dir_entry(target.parent, position)?;
        Ok(())
    }

    /// Recomputes `cwd_path` by climbing `..` records up to the root.
    fn rebuild_cwd_path(&mut self) -> Result<()> {
        let mut dir = self.cwd;
        let fs = self.fs()?;
        let limit = fs.boot_sector().cluster_count();

        let mut names = Vec::new();
        while dir != ClusterId::ROOT {
            if names.len() > limit {
                return Err(flatfat::Error::from(ClusterError::Loop(dir)).into());
            }

            let entry = fs.dir_entry(dir, false)?;
            let parent = fs
                .read_dir(&entry)?
                .get(1)
                .map(DirEntry::start_cluster)
                .ok_or(flatfat::Error::NotFound)?;

            let parent_entry = fs.dir_entry(parent, false)?;
            let name = fs
                .read_dir(&parent_entry)?
                .into_iter()
                .find(|child| {
                    child.is_dir() && !child.is_relative() && child.start_cluster() == dir
                })
                .map(|child| child.name())
                .ok_or(flatfat::Error::NotFound)?;

            names.push(name);
            dir = parent;
        }

        names.reverse();
        self.cwd_path = names;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::io::Cursor;

    use super::*;

    /// Scratch directory under the system temp dir, removed on drop.
    struct Scratch(PathBuf);

    impl Scratch {
        fn new(name: &str) -> Self {
            let dir = env::temp_dir().join(format!("flatfat-shell-{}-{name}", std::process::id()));
            let _ = fs::remove_dir_all(&dir);
            fs::create_dir_all(&dir).unwrap();
            Self(dir)
        }

        fn path(&self, file: &str) -> PathBuf {
            self.0.join(file)
        }

        fn shell(&self) -> Shell<Vec<u8>> {
            Shell::open(self.path("fs.img"), Vec::new()).unwrap()
        }
    }

    impl Drop for Scratch {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.0);
        }
    }

    /// Runs `lines` and returns what they printed.
    fn run(shell: &mut Shell<Vec<u8>>, lines: &[&str]) -> String {
        shell.out.clear();
        for line in lines {
            assert_eq!(Flow::Continue, shell.run_line(line).unwrap(), "{line}");
        }
        String::from_utf8(shell.out.clone()).unwrap()
    }

    #[test]
    fn home_directory() {
        let scratch = Scratch::new("home");
        let mut shell = scratch.shell();
        assert!(!shell.is_mounted());

        assert_eq!("OK\nOK\n", run(&mut shell, &["format 64KB", "mkdir /home"]));
        let listing = run(&mut shell, &["ls /"]);
        assert!(listing.lines().any(|line| line.starts_with("home ")), "{listing}");

        assert_eq!("/home\n", run(&mut shell, &["cd /home", "pwd"]));
        assert_eq!("/home$ ", shell.prompt());
        assert_eq!("/\n", run(&mut shell, &["cd ..", "pwd"]));
        assert_eq!(
            "/ 0 B in 1 cluster(s): 0\n124 free cluster(s)\n",
            run(&mut shell, &["info /"])
        );
        assert!(run(&mut shell, &["info /home"]).starts_with("home 0 B in 1 cluster(s): "));
    }

    #[test]
    fn unmounted() {
        let scratch = Scratch::new("unmounted");
        let mut shell = scratch.shell();
        let out = run(&mut shell, &["ls", "pwd"]);
        assert_eq!(2, out.matches("no image mounted").count());
        assert!(!scratch.path("fs.img").exists());
    }

    #[test]
    fn corrupt_image() {
        let scratch = Scratch::new("corrupt");
        fs::write(scratch.path("fs.img"), vec![0u8; 100]).unwrap();

        let mut shell = scratch.shell();
        assert!(!shell.is_mounted());
        assert!(run(&mut shell, &["ls"]).contains("no image mounted"));
        assert_eq!("OK\n", run(&mut shell, &["format 64KB"]));
    }

    #[test]
    fn remount() {
        let scratch = Scratch::new("remount");
        let mut shell = scratch.shell();
        run(&mut shell, &["format 1MB", "mkdir kept"]);
        drop(shell);

        assert_eq!(1024 * 1024, fs::metadata(scratch.path("fs.img")).unwrap().len());
        let mut shell = scratch.shell();
        assert!(shell.is_mounted());
        assert!(run(&mut shell, &["ls"]).contains("kept"));
    }

    #[test]
    fn host_files() {
        let scratch = Scratch::new("host");
        let big = scratch.path("big.bin");
        fs::write(&big, vec![b'x'; 5000]).unwrap();
        fs::write(scratch.path("hello.txt"), b"hello").unwrap();

        let mut shell = scratch.shell();
        run(&mut shell, &["format 64KB"]);
        run(
            &mut shell,
            &[
                &format!("incp {} big", big.display()),
                &format!("incp {} hello", scratch.path("hello.txt").display()),
            ],
        );

        assert!(run(&mut shell, &["info big"]).starts_with("big 5000 B in 10 cluster(s): "));
        assert_eq!("hello\n", run(&mut shell, &["cat /hello"]));

        run(&mut shell, &["short big"]);
        assert!(run(&mut shell, &["info big"]).starts_with("big 3000 B in 6 cluster(s): "));

        let back = scratch.path("back.bin");
        run(&mut shell, &[&format!("outcp big {}", back.display())]);
        assert_eq!(vec![b'x'; 3000], fs::read(&back).unwrap());

        let missing = run(&mut shell, &[&format!("incp {} x", scratch.path("nope").display())]);
        assert!(missing.contains("nope"), "{missing}");
    }

    #[test]
    fn copy_and_move() {
        let scratch = Scratch::new("copy");
        fs::write(scratch.path("a.txt"), b"ab").unwrap();
        fs::write(scratch.path("b.txt"), b"cd\n").unwrap();

        let mut shell = scratch.shell();
        run(
            &mut shell,
            &[
                "format 64KB",
                "mkdir d",
                &format!("incp {} a", scratch.path("a.txt").display()),
                &format!("incp {} b", scratch.path("b.txt").display()),
            ],
        );

        run(&mut shell, &["cp a d", "cp a d/renamed", "xcp a b ab"]);
        let listing = run(&mut shell, &["ls d"]);
        assert!(listing.contains("a ") && listing.contains("renamed"), "{listing}");
        assert_eq!("abcd\n", run(&mut shell, &["cat ab"]));

        run(&mut shell, &["mv b d", "mv a c"]);
        let listing = run(&mut shell, &["ls /"]);
        assert!(!listing.lines().any(|line| line.starts_with("a ")));
        assert!(!listing.lines().any(|line| line.starts_with("b ")));
        assert!(listing.lines().any(|line| line.starts_with("c ")));
        assert_eq!("cd\n", run(&mut shell, &["cat d/b"]));

        // Renaming the working directory shows up in its path.
        assert_eq!("/d\n", run(&mut shell, &["cd d", "pwd"]));
        assert_eq!("OK\n/e\n", run(&mut shell, &["mv /d /e", "pwd"]));
    }

    #[test]
    fn reported_errors() {
        let scratch = Scratch::new("errors");
        let mut shell = scratch.shell();
        run(&mut shell, &["format 64KB", "mkdir d", "mkdir d/inner"]);

        assert_eq!("already exists\n", run(&mut shell, &["mkdir d"]));
        assert_eq!("directory not empty\n", run(&mut shell, &["rmdir d"]));
        assert_eq!("not found\n", run(&mut shell, &["cd nowhere"]));
        assert_eq!("is a directory\n", run(&mut shell, &["rm d"]));
        assert_eq!("unknown command `dir`\n", run(&mut shell, &["dir"]));
        assert_eq!("cannot remove the working directory\n", run(&mut shell, &["rmdir ."]));
        assert!(run(&mut shell, &["format 10"]).starts_with("bad size"));
        assert_eq!("disk size is too small\n", run(&mut shell, &["format 0KB"]));

        // Nothing above changed the image.
        assert_eq!("OK\nOK\n", run(&mut shell, &["rmdir d/inner", "rmdir d"]));
    }

    #[test]
    fn scripts() {
        let scratch = Scratch::new("scripts");
        let script = scratch.path("again.txt");
        fs::write(&script, format!("mkdir s\n\nload {}\n", script.display())).unwrap();

        let mut shell = scratch.shell();
        run(&mut shell, &["format 64KB"]);
        let out = run(&mut shell, &[&format!("load {}", script.display())]);
        assert!(out.starts_with("/$ mkdir s\nOK\n"), "{out}");
        assert_eq!(MAX_SCRIPT_DEPTH - 1, out.matches("already exists").count());
        assert_eq!(1, out.matches("scripts nested too deeply").count());
        assert_eq!(0, shell.depth);

        let exits = scratch.path("exits.txt");
        fs::write(&exits, "mkdir before\nexit\nmkdir after\n").unwrap();
        assert_eq!(Flow::Exit, shell.run_script(&exits).unwrap());
        let listing = run(&mut shell, &["ls"]);
        assert!(listing.contains("before") && !listing.contains("after"));
    }

    #[test]
    fn interactive() {
        let scratch = Scratch::new("interactive");
        let mut shell = scratch.shell();
        shell
            .run(Cursor::new("format 64KB\nmkdir x\n\nexit\nmkdir y\n"))
            .unwrap();

        let out = String::from_utf8(shell.out.clone()).unwrap();
        assert_eq!("/$ OK\n/$ OK\n/$ /$ ", out);
        let listing = run(&mut shell, &["ls"]);
        assert!(listing.contains("x") && !listing.contains("y"));
    }
}
