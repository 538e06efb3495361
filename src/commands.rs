//! Terminal command surface.
//!
//! Sentence, chapter and bookmark numbers are shown and entered 1-based;
//! they are converted to 0-based positions while parsing.

use std::io::{BufRead, Write};

use anyhow::{Context, Result, anyhow, bail};
use narrator_core::config::{BackendKind, PLAYBACK_SPEEDS};
use narrator_core::document::DocumentSession;
use narrator_core::engine::PlaybackSnapshot;
use tracing::{debug, warn};

pub const HELP: &str = "\
Commands:
  play | pause | stop          control playback
  jump <n> | next | prev       move to sentence n / the next / the previous one
  rate [x]                     set speed (0.5-2.0) or cycle through presets
  backend remote|device        switch speech backend (while stopped)
  voice <id> | voices          pick a voice / list voices for the backend
  chapters | chapter <n>       list chapters / jump to chapter n
  bookmarks | bookmark         list bookmarks / bookmark the current sentence
  unbookmark <n> | goto <n>    delete bookmark n / jump to bookmark n
  status | help | quit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Play,
    Pause,
    Stop,
    Jump(usize),
    Next,
    Prev,
    Rate(Option<f32>),
    Backend(BackendKind),
    Voice(String),
    Voices,
    Chapters,
    Chapter(usize),
    Bookmarks,
    Bookmark,
    Unbookmark(usize),
    Goto(usize),
    Status,
    Help,
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Parse one input line. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Result<Option<Command>> {
    let mut words = line.split_whitespace();
    let Some(name) = words.next() else {
        return Ok(None);
    };
    let arg = words.next();
    let command = match name.to_ascii_lowercase().as_str() {
        "play" | "p" => Command::Play,
        "pause" => Command::Pause,
        "stop" | "s" => Command::Stop,
        "jump" | "j" => Command::Jump(position(arg, "jump <sentence>")?),
        "next" | "n" => Command::Next,
        "prev" => Command::Prev,
        "rate" | "speed" => Command::Rate(match arg {
            Some(value) => Some(
                value
                    .parse::<f32>()
                    .with_context(|| format!("invalid rate {value:?}"))?,
            ),
            None => None,
        }),
        "backend" => {
            let value = arg.ok_or_else(|| anyhow!("usage: backend remote|device"))?;
            Command::Backend(value.parse().map_err(|err: String| anyhow!(err))?)
        }
        "voice" => {
            let rest: Vec<&str> = line.split_whitespace().skip(1).collect();
            if rest.is_empty() {
                bail!("usage: voice <id>");
            }
            Command::Voice(rest.join(" "))
        }
        "voices" => Command::Voices,
        "chapters" => Command::Chapters,
        "chapter" => Command::Chapter(position(arg, "chapter <n>")?),
        "bookmarks" => Command::Bookmarks,
        "bookmark" | "b" => Command::Bookmark,
        "unbookmark" => Command::Unbookmark(position(arg, "unbookmark <n>")?),
        "goto" => Command::Goto(position(arg, "goto <n>")?),
        "status" => Command::Status,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other => bail!("unknown command {other:?}; type help"),
    };
    Ok(Some(command))
}

/// 1-based user number to 0-based position.
fn position(arg: Option<&str>, usage: &str) -> Result<usize> {
    let value = arg.ok_or_else(|| anyhow!("usage: {usage}"))?;
    let number: usize = value
        .parse()
        .with_context(|| format!("expected a number, got {value:?}"))?;
    number
        .checked_sub(1)
        .ok_or_else(|| anyhow!("numbers start at 1"))
}

/// Next preset speed after `current`, wrapping around.
pub fn next_preset_rate(current: f32) -> f32 {
    PLAYBACK_SPEEDS
        .iter()
        .copied()
        .find(|speed| *speed > current + f32::EPSILON)
        .unwrap_or(PLAYBACK_SPEEDS[0])
}

pub fn format_status(snapshot: &PlaybackSnapshot, chapter: Option<&str>) -> String {
    let mut line = format!(
        "[{}] sentence {}/{} at {:.2}x via {}",
        snapshot.phase,
        (snapshot.current_index + 1).min(snapshot.sentence_count.max(1)),
        snapshot.sentence_count,
        snapshot.rate,
        snapshot.backend
    );
    if let Some(chapter) = chapter {
        line.push_str(&format!(" in {chapter}"));
    }
    if let Some(err) = &snapshot.last_error {
        line.push_str(&format!(" (error: {err})"));
    }
    line
}

pub fn execute(
    session: &mut DocumentSession,
    command: Command,
    out: &mut impl Write,
) -> Result<Flow> {
    debug!(?command, "Executing command");
    let engine = session.engine();
    match command {
        Command::Play => {
            engine.play();
        }
        Command::Pause => {
            engine.pause();
        }
        Command::Stop => {
            engine.stop();
        }
        Command::Jump(index) => {
            engine.jump(index)?;
            print_sentence(session, index, out)?;
        }
        Command::Next | Command::Prev => {
            let snapshot = engine.snapshot();
            let index = if command == Command::Next {
                (snapshot.current_index + 1).min(snapshot.sentence_count.saturating_sub(1))
            } else {
                snapshot.current_index.saturating_sub(1)
            };
            engine.jump(index)?;
            print_sentence(session, index, out)?;
        }
        Command::Rate(rate) => {
            let rate = rate.unwrap_or_else(|| next_preset_rate(engine.snapshot().rate));
            let event = engine.set_rate(rate);
            writeln!(out, "Rate {:.2}x", event.snapshot.rate)?;
        }
        Command::Backend(kind) => {
            session.select_backend(kind)?;
            writeln!(out, "Backend {kind}")?;
        }
        Command::Voice(voice) => {
            session.select_voice(&voice)?;
            writeln!(out, "Voice {voice}")?;
        }
        Command::Voices => {
            let voices = session.available_voices();
            if voices.is_empty() {
                writeln!(out, "No voices available")?;
            }
            for voice in voices {
                writeln!(out, "  {:<12} {}", voice.id, voice.label)?;
            }
        }
        Command::Chapters => {
            if session.chapters().is_empty() {
                writeln!(out, "No chapters detected")?;
            }
            for (n, chapter) in session.chapters().iter().enumerate() {
                writeln!(
                    out,
                    "  {:>3}. {} (sentence {})",
                    n + 1,
                    chapter.title,
                    chapter.sentence_index + 1
                )?;
            }
        }
        Command::Chapter(position) => {
            let event = session.jump_to_chapter(position)?;
            print_sentence(session, event.snapshot.current_index, out)?;
        }
        Command::Bookmarks => {
            if session.bookmarks().is_empty() {
                writeln!(out, "No bookmarks")?;
            }
            for (n, bookmark) in session.bookmarks().entries().iter().enumerate() {
                writeln!(
                    out,
                    "  {:>3}. sentence {}: {}",
                    n + 1,
                    bookmark.sentence_index + 1,
                    bookmark.text_snippet
                )?;
            }
        }
        Command::Bookmark => match session.add_bookmark() {
            Some(bookmark) => writeln!(
                out,
                "Bookmarked sentence {}",
                bookmark.sentence_index + 1
            )?,
            None => writeln!(out, "Already bookmarked")?,
        },
        Command::Unbookmark(position) => {
            let sentence_index = session.bookmarks().get(position).map(|b| b.sentence_index);
            match sentence_index {
                Some(index) if session.delete_bookmark(index) => {
                    writeln!(out, "Removed bookmark {} (sentence {})", position + 1, index + 1)?
                }
                _ => writeln!(out, "There is no bookmark {}", position + 1)?,
            }
        }
        Command::Goto(position) => {
            let event = session.jump_to_bookmark(position)?;
            print_sentence(session, event.snapshot.current_index, out)?;
        }
        Command::Status => {
            let snapshot = engine.snapshot();
            let chapter = session
                .chapter_at(snapshot.current_index)
                .map(|chapter| chapter.title.as_str());
            writeln!(out, "{}", format_status(&snapshot, chapter))?;
        }
        Command::Help => writeln!(out, "{HELP}")?,
        Command::Quit => return Ok(Flow::Quit),
    }
    Ok(Flow::Continue)
}

fn print_sentence(session: &DocumentSession, index: usize, out: &mut impl Write) -> Result<()> {
    if let Some(sentence) = session.sentences().get(index) {
        writeln!(out, "  {}: {sentence}", index + 1)?;
    }
    Ok(())
}

/// Read commands until `quit` or end of input.
pub fn run_loop(
    session: &mut DocumentSession,
    input: impl BufRead,
    out: &mut impl Write,
) -> Result<()> {
    writeln!(out, "{HELP}")?;
    for line in input.lines() {
        let line = line.context("reading command")?;
        let command = match parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(err) => {
                writeln!(out, "{err:#}")?;
                continue;
            }
        };
        match execute(session, command, out) {
            Ok(Flow::Quit) => break,
            Ok(Flow::Continue) => {}
            Err(err) => {
                warn!("Command failed: {err:#}");
                writeln!(out, "{err:#}")?;
            }
        }
        out.flush()?;
    }
    Ok(())
}
