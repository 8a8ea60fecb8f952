//! RTL simulation environment setup.
//!
//! Runs the ASE generator script over the design's RTL directories and then
//! moves package files that must compile first to the top of the generated
//! file lists.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::info;

use crate::error::{Error, Result};

pub const VLOG_LIST: &str = "vlog_files.list";
pub const VLOG_FIRST: [&str; 4] = ["ccis_if_pkg", "ccis_if_funcs_pkg", "ccip_if_funcs_pkg", "cci_mpf_if_pkg"];

pub const VHDL_LIST: &str = "vhdl_files.list";
pub const VHDL_FIRST: [&str; 2] = ["dspba_library_package.vhd", "dspba_library.vhd"];

/// For each key in order, the first line containing it; then every line
/// that contains no key at all.
pub fn reorder_lines(content: &str, keys: &[&str]) -> String {
    let mut out = String::with_capacity(content.len());
    for key in keys {
        if let Some(line) = content.lines().find(|l| l.contains(key)) {
            out.push_str(line);
            out.push('\n');
        }
    }
    for line in content.lines().filter(|l| !keys.iter().any(|k| l.contains(k))) {
        out.push_str(line);
        out.push('\n');
    }
    out
}

/// Rewrite `path` in place with [`reorder_lines`].
pub fn shift_to_top(path: &Path, keys: &[&str]) -> Result<()> {
    let content = fs::read_to_string(path)?;
    fs::write(path, reorder_lines(&content, keys))?;
    Ok(())
}

pub struct AseEnvironment {
    /// Root of the RTL sources.
    pub rtl: PathBuf,
    /// SDK root holding `ase/`.
    pub workdir: PathBuf,
    pub python: String,
}

impl AseEnvironment {
    pub fn new(rtl: impl Into<PathBuf>, workdir: impl Into<PathBuf>) -> Self {
        AseEnvironment {
            rtl: rtl.into(),
            workdir: workdir.into(),
            python: "python".to_string(),
        }
    }

    /// Use `workdir` when given, else the `WORKDIR` environment variable.
    pub fn from_env(rtl: impl Into<PathBuf>, workdir: Option<PathBuf>) -> Result<Self> {
        let workdir = match workdir {
            Some(w) => w,
            None => std::env::var_os("WORKDIR")
                .map(PathBuf::from)
                .ok_or(Error::MissingEnv("WORKDIR"))?,
        };
        Ok(Self::new(rtl, workdir))
    }

    pub fn ase_dir(&self) -> PathBuf {
        self.workdir.join("ase")
    }

    pub fn rtl_paths(&self) -> Vec<String> {
        let rtl = self.rtl.display();
        vec![format!("{rtl}/nlb/"), format!("{rtl}/IP/sim"), format!("{rtl}/SCD_RTL/")]
    }

    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.python);
        cmd.arg(self.ase_dir().join("scripts").join("generate_ase_environment.py"))
            .args(self.rtl_paths())
            .arg("-t")
            .arg("QUESTA")
            .current_dir(self.ase_dir());
        cmd
    }

    /// Run the generator, then reorder both file lists.
    pub fn run(&self) -> Result<()> {
        let mut cmd = self.command();
        let rendered = format!("{cmd:?}");
        info!("executing {rendered} in {}", self.ase_dir().display());
        let status = cmd.status()?;
        if !status.success() {
            return Err(Error::Command {
                command: rendered,
                status: status.to_string(),
            });
        }

        let ase = self.ase_dir();
        shift_to_top(&ase.join(VLOG_LIST), &VLOG_FIRST)?;
        shift_to_top(&ase.join(VHDL_LIST), &VHDL_FIRST)?;
        info!("reordered {VLOG_LIST} and {VHDL_LIST}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_come_first_in_key_order() {
        let content = "a.sv\nx/cci_mpf_if_pkg.sv\nb.sv\ny/ccis_if_pkg.sv\nz/ccis_if_pkg_copy.sv\n";
        let out = reorder_lines(content, &VLOG_FIRST);
        assert_eq!(out, "y/ccis_if_pkg.sv\nx/cci_mpf_if_pkg.sv\na.sv\nb.sv\n");
    }

    #[test]
    fn vhdl_keys_are_not_confused() {
        let content = "top.vhd\nlib/dspba_library.vhd\nlib/dspba_library_package.vhd\n";
        let out = reorder_lines(content, &VHDL_FIRST);
        assert_eq!(out, "lib/dspba_library_package.vhd\nlib/dspba_library.vhd\ntop.vhd\n");
    }

    #[test]
    fn rtl_paths_and_command_line() {
        let env = AseEnvironment::new("/rtl", "/sdk");
        assert_eq!(env.rtl_paths(), ["/rtl/nlb/", "/rtl/IP/sim", "/rtl/SCD_RTL/"]);
        let cmd = env.command();
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args.first().map(String::as_str), Some("/sdk/ase/scripts/generate_ase_environment.py"));
        assert_eq!(&args[args.len() - 2..], ["-t", "QUESTA"]);
        assert_eq!(cmd.get_current_dir(), Some(Path::new("/sdk/ase")));
    }

    #[test]
    fn explicit_workdir_wins() {
        let env = AseEnvironment::from_env("/rtl", Some(PathBuf::from("/w"))).unwrap();
        assert_eq!(env.workdir, PathBuf::from("/w"));
    }

    #[cfg(unix)]
    #[test]
    fn run_reorders_lists_after_success() {
        let dir = tempfile::tempdir().unwrap();
        let ase = dir.path().join("ase");
        fs::create_dir_all(&ase).unwrap();
        fs::write(ase.join(VLOG_LIST), "a.sv\nccis_if_pkg.sv\n").unwrap();
        fs::write(ase.join(VHDL_LIST), "top.vhd\ndspba_library.vhd\n").unwrap();

        let mut env = AseEnvironment::new("/rtl", dir.path());
        env.python = "true".to_string();
        env.run().unwrap();
        assert_eq!(fs::read_to_string(ase.join(VLOG_LIST)).unwrap(), "ccis_if_pkg.sv\na.sv\n");
        assert_eq!(fs::read_to_string(ase.join(VHDL_LIST)).unwrap(), "dspba_library.vhd\ntop.vhd\n");

        env.python = "false".to_string();
        assert!(matches!(env.run(), Err(Error::Command { .. })));
    }
}
