use anyhow::Result;
use chrono::FixedOffset;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

use crate::annotation::{self, Interval, Stamp, StampEncoding};
use crate::navigation::{Cursor, NavState, NavigationController, Step};
use crate::timestamp;

/// How long a command waits for a chunk load before answering.
pub const LOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Options of the command loop.
#[derive(Debug, Clone)]
pub struct CommandOptions {
    pub time_zone: FixedOffset,
    /// Intervals closed with `MARK` are appended here.
    pub annotation_file: Option<PathBuf>,
    pub encoding: StampEncoding,
}

/// Drive a controller from line commands, answering on `out`.
///
/// Every command that moves the cursor waits until the target chunk is
/// loaded (or fails) and answers with a `STATUS` line.
pub fn handle_commands<R: BufRead, W: Write>(
    controller: &mut NavigationController,
    input: R,
    mut out: W,
    options: &CommandOptions,
) -> Result<()> {
    let mut mark: Option<Cursor> = None;
    let events = controller.subscribe();

    for line_res in input.lines() {
        let line = match line_res {
            Ok(line) => line,
            Err(e) => {
                tracing::error!("stdin read error: {}", e);
                break;
            }
        };
        let cmd = line.trim();
        if cmd.is_empty() {
            continue;
        }
        let (verb, arg) = match cmd.split_once(char::is_whitespace) {
            Some((v, a)) => (v, a.trim()),
            None => (cmd, ""),
        };

        match verb.to_ascii_uppercase().as_str() {
            "SEEK" => match Stamp::parse(arg, options.time_zone) {
                Ok(Stamp::Time(t)) => controller.seek_to_time(t),
                Ok(Stamp::Index {
                    chunk_index,
                    sample_index,
                }) => controller.seek_to_position(chunk_index, sample_index),
                Err(e) => {
                    writeln!(out, "ERROR bad SEEK arg: {}", e)?;
                    out.flush().ok();
                    continue;
                }
            },
            "STEP" => match parse_step(arg) {
                Some(step) => controller.step(step),
                None => {
                    writeln!(out, "ERROR bad STEP arg")?;
                    out.flush().ok();
                    continue;
                }
            },
            "CHUNK" => match arg.parse::<usize>() {
                Ok(index) => {
                    if !controller.set_chunk(index) {
                        writeln!(out, "ERROR no chunk {}", index)?;
                        out.flush().ok();
                        continue;
                    }
                }
                Err(_) => {
                    writeln!(out, "ERROR bad CHUNK arg")?;
                    out.flush().ok();
                    continue;
                }
            },
            "NEXT" => {
                controller.next_chunk();
            }
            "PREV" => {
                controller.previous_chunk();
            }
            "WINDOW" => match arg.parse::<f64>() {
                Ok(secs) if secs > 0.0 => controller.set_window_duration(secs),
                _ => {
                    writeln!(out, "ERROR bad WINDOW arg")?;
                    out.flush().ok();
                    continue;
                }
            },
            "ZOOM" => match arg.to_ascii_uppercase().as_str() {
                "IN" | "" => controller.zoom_in(),
                "OUT" => controller.zoom_out(),
                "ALL" => controller.show_all(),
                other => match other.parse::<f64>() {
                    Ok(factor) if factor > 0.0 => controller.set_zoom(factor),
                    _ => {
                        writeln!(out, "ERROR bad ZOOM arg")?;
                        out.flush().ok();
                        continue;
                    }
                },
            },
            "PLAY" => controller.play(),
            "PAUSE" | "STOP" => controller.pause(),
            "TICK" => match arg.parse::<f64>() {
                Ok(secs) if secs >= 0.0 => controller.tick(Duration::from_secs_f64(secs)),
                _ => {
                    writeln!(out, "ERROR bad TICK arg")?;
                    out.flush().ok();
                    continue;
                }
            },
            "STATUS" => {}
            "STAMP" => {
                controller.wait_until_ready(LOAD_TIMEOUT);
                let (time, index) = annotation::stamps(&controller.cursor());
                writeln!(out, "STAMP {} {}", time, index)?;
                out.flush().ok();
                continue;
            }
            "MARK" => {
                controller.wait_until_ready(LOAD_TIMEOUT);
                let here = controller.cursor();
                match mark.take() {
                    None => {
                        mark = Some(here);
                        writeln!(out, "MARK {}", Stamp::from_cursor(&here, options.encoding))?;
                    }
                    Some(start) => {
                        let interval = Interval::from_cursors(&start, &here, options.encoding)?;
                        if let Some(path) = &options.annotation_file {
                            annotation::append_interval(path, &interval)?;
                        }
                        writeln!(out, "INTERVAL {}", interval)?;
                    }
                }
                out.flush().ok();
                continue;
            }
            "QUIT" => {
                writeln!(out, "STATUS QUIT")?;
                out.flush().ok();
                break;
            }
            _ => {
                writeln!(out, "ERROR unknown command: {}", cmd)?;
                out.flush().ok();
                continue;
            }
        }

        if !controller.wait_until_ready(LOAD_TIMEOUT) {
            writeln!(out, "ERROR chunk load timed out")?;
        }
        for event in events.try_iter() {
            match event {
                crate::navigation::NavigationEvent::ChunkLoadFailed {
                    chunk_index,
                    message,
                } => writeln!(out, "ERROR chunk {} failed: {}", chunk_index, message)?,
                crate::navigation::NavigationEvent::Warning(message) => {
                    writeln!(out, "WARNING {}", message)?
                }
                _ => {}
            }
        }
        writeln!(out, "{}", status_line(controller))?;
        out.flush().ok();
    }
    Ok(())
}

/// `STEP 25` moves 25 reference samples, `STEP -1.5s` moves 1.5 s back.
fn parse_step(arg: &str) -> Option<Step> {
    if let Some(secs) = arg.strip_suffix('s') {
        return secs.trim().parse::<f64>().ok().map(Step::Seconds);
    }
    arg.parse::<i64>().ok().map(Step::Samples)
}

/// `STATUS STOPPED chunk=0 sample=125 time=2021-03-02T09:33:56.000 window=0.000+30.000`
pub fn status_line(controller: &NavigationController) -> String {
    let cursor = controller.cursor();
    let state = match controller.state() {
        NavState::Stopped => "STOPPED",
        NavState::Playing => "PLAYING",
        NavState::Seeking => "SEEKING",
    };
    let (start, duration) = controller.window_range();
    format!(
        "STATUS {} chunk={} sample={} time={} window={:.3}+{:.3}",
        state,
        cursor.chunk_index,
        cursor.sample_index,
        timestamp::format_datetime(cursor.absolute_time),
        start,
        duration
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_arguments() {
        assert_eq!(parse_step("25"), Some(Step::Samples(25)));
        assert_eq!(parse_step("-3"), Some(Step::Samples(-3)));
        assert_eq!(parse_step("1.5s"), Some(Step::Seconds(1.5)));
        assert_eq!(parse_step("-2s"), Some(Step::Seconds(-2.0)));
        assert_eq!(parse_step("abc"), None);
    }
}
