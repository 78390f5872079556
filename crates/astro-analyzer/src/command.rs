//! Staged commands and the resolver-owned queue
//!
//! Commands are built as a program plus argv, never as a shell string, so
//! file names with spaces survive intact. [`StagedCommand::command_line`]
//! renders the traditional one-line form for logs and reports.

use crate::config::ProgramTable;
use astro_store::Juid;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;

/// What a staged command produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CommandKind {
    FindStars,
    StarMatch,
    Stack,
    Photometry,
    Bvri,
    Merge,
}

/// One external command awaiting execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StagedCommand {
    /// Node whose evaluation staged the command
    pub origin: Juid,
    pub kind: CommandKind,
    pub program: String,
    pub args: Vec<String>,
}

impl StagedCommand {
    /// Program and arguments joined by spaces
    #[must_use]
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for StagedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

/// Builds the argv of each command kind
#[derive(Debug, Clone, Copy)]
pub struct CommandBuilder<'a> {
    programs: &'a ProgramTable,
}

impl<'a> CommandBuilder<'a> {
    /// Create a builder using the configured program names
    #[must_use]
    pub fn new(programs: &'a ProgramTable) -> Self {
        Self { programs }
    }

    fn staged(origin: Juid, kind: CommandKind, program: &str, args: Vec<String>) -> StagedCommand {
        StagedCommand {
            origin,
            kind,
            program: program.to_string(),
            args,
        }
    }

    /// `find_stars -f [-d DARK] -i FILE`
    #[must_use]
    pub fn find_stars(&self, origin: Juid, file: &str, dark: Option<&str>) -> StagedCommand {
        let mut args = vec!["-f".to_string()];
        if let Some(dark) = dark {
            args.extend(["-d".to_string(), dark.to_string()]);
        }
        args.extend(["-i".to_string(), file.to_string()]);
        Self::staged(origin, CommandKind::FindStars, &self.programs.find_stars, args)
    }

    /// `star_match -n TARGET -b -h -f -e -i FILE`
    #[must_use]
    pub fn star_match(&self, origin: Juid, file: &str, target: &str) -> StagedCommand {
        let args = ["-n", target, "-b", "-h", "-f", "-e", "-i", file]
            .map(String::from)
            .to_vec();
        Self::staged(origin, CommandKind::StarMatch, &self.programs.star_match, args)
    }

    /// `stack -o OUT [-d DARK] [-s FLAT] FILE...`
    #[must_use]
    pub fn stack(
        &self,
        origin: Juid,
        output: &str,
        dark: Option<&str>,
        flat: Option<&str>,
        inputs: &[String],
    ) -> StagedCommand {
        let mut args = vec!["-o".to_string(), output.to_string()];
        if let Some(dark) = dark {
            args.extend(["-d".to_string(), dark.to_string()]);
        }
        if let Some(flat) = flat {
            args.extend(["-s".to_string(), flat.to_string()]);
        }
        args.extend(inputs.iter().cloned());
        Self::staged(origin, CommandKind::Stack, &self.programs.stack, args)
    }

    /// `photometry -i FILE [-s FLAT] [-d DARK]`
    #[must_use]
    pub fn photometry(
        &self,
        origin: Juid,
        file: &str,
        flat: Option<&str>,
        dark: Option<&str>,
    ) -> StagedCommand {
        let mut args = vec!["-i".to_string(), file.to_string()];
        if let Some(flat) = flat {
            args.extend(["-s".to_string(), flat.to_string()]);
        }
        if let Some(dark) = dark {
            args.extend(["-d".to_string(), dark.to_string()]);
        }
        Self::staged(origin, CommandKind::Photometry, &self.programs.photometry, args)
    }

    /// `do_bvri -d BASE_DIR -t TARGET`
    #[must_use]
    pub fn bvri(&self, origin: Juid, base_dir: &str, target: &str) -> StagedCommand {
        let args = ["-d", base_dir, "-t", target].map(String::from).to_vec();
        Self::staged(origin, CommandKind::Bvri, &self.programs.do_bvri, args)
    }

    /// `do_merge [-o SIDECAR] -i ID...`
    #[must_use]
    pub fn merge(&self, origin: Juid, sidecar: Option<Juid>, inputs: &[Juid]) -> StagedCommand {
        let mut args = Vec::new();
        if let Some(sidecar) = sidecar {
            args.extend(["-o".to_string(), sidecar.to_string()]);
        }
        for input in inputs {
            args.extend(["-i".to_string(), input.to_string()]);
        }
        Self::staged(origin, CommandKind::Merge, &self.programs.do_merge, args)
    }
}

/// FIFO of commands staged by one walk
#[derive(Debug, Default, Clone)]
pub struct CommandQueue {
    commands: VecDeque<StagedCommand>,
}

impl CommandQueue {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the end of the queue
    pub fn push(&mut self, command: StagedCommand) {
        tracing::debug!(origin = %command.origin, command = %command, "staged");
        self.commands.push_back(command);
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StagedCommand> {
        self.commands.iter()
    }

    /// Drop every command staged after the first `len`
    pub fn truncate(&mut self, len: usize) {
        self.commands.truncate(len);
    }

    /// Take every command in staging order
    pub fn drain(&mut self) -> Vec<StagedCommand> {
        self.commands.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_lines_follow_tool_conventions() {
        let programs = ProgramTable::default();
        let b = CommandBuilder::new(&programs);
        let id = Juid(2_000_001);

        assert_eq!(
            b.find_stars(id, "/img/v.fits", Some("/img/dark.fits")).command_line(),
            "find_stars -f -d /img/dark.fits -i /img/v.fits"
        );
        assert_eq!(
            b.star_match(id, "/img/v.fits", "rr-lyr").command_line(),
            "star_match -n rr-lyr -b -h -f -e -i /img/v.fits"
        );
        assert_eq!(
            b.stack(
                Juid(6_000_001),
                "/img/s.fits",
                None,
                Some("/img/flat.fits"),
                &["/img/a.fits".into(), "/img/b.fits".into()]
            )
            .command_line(),
            "stack -o /img/s.fits -s /img/flat.fits /img/a.fits /img/b.fits"
        );
        assert_eq!(
            b.photometry(id, "/img/v.fits", None, Some("/img/dark.fits")).command_line(),
            "photometry -i /img/v.fits -d /img/dark.fits"
        );
        assert_eq!(
            b.merge(Juid(5_000_003), Some(Juid(3_000_001)), &[Juid(4_000_001), Juid(4_000_002)])
                .command_line(),
            "do_merge -o 3000001 -i 4000001 -i 4000002"
        );
    }

    #[test]
    fn queue_is_fifo() {
        let programs = ProgramTable::default();
        let b = CommandBuilder::new(&programs);
        let mut queue = CommandQueue::new();
        queue.push(b.bvri(Juid(5_000_002), "/session", "rr-lyr"));
        queue.push(b.merge(Juid(5_000_003), None, &[Juid(4_000_001)]));

        let drained = queue.drain();
        assert!(queue.is_empty());
        assert_eq!(drained[0].kind, CommandKind::Bvri);
        assert_eq!(drained[1].command_line(), "do_merge -i 4000001");
    }
}
