//! Parsing of the `key=value` progress blocks ffmpeg emits on
//! `-progress pipe:1`.

/// One event on a pipeline operation's stream. `Ended` and `Failed` are
/// terminal; dropping the receiver stops delivery.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    Started { pid: u32, command: String },
    Progress(Progress),
    Ended,
    Failed(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Progress {
    pub frame: Option<u64>,
    pub fps: Option<f64>,
    pub out_time_ms: Option<i64>,
    pub speed: Option<f64>,
    /// Derived from `frame` when the caller supplied a total frame count.
    pub percent: Option<f64>,
}

impl Progress {
    pub fn describe(&self) -> String {
        if let Some(percent) = self.percent {
            format!("{percent:.1}%")
        } else if let Some(frame) = self.frame {
            format!("frame {frame}")
        } else {
            String::from("running")
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLine {
    /// A finished progress block.
    Block(Progress),
    /// The encoder's own end-of-stream sentinel. Emitted at most once; not a
    /// statement about the process exit status.
    End,
    None,
}

/// Accumulates token lines into blocks. ffmpeg terminates each block with a
/// `progress=continue` or `progress=end` line.
#[derive(Debug, Default)]
pub struct ProgressParser {
    current: Progress,
    total_frames: Option<u64>,
    end_seen: bool,
}

impl ProgressParser {
    pub fn new(total_frames: Option<u64>) -> Self {
        Self {
            total_frames,
            ..Self::default()
        }
    }

    pub fn push_line(&mut self, line: &str) -> ParsedLine {
        let Some((key, value)) = line.trim().split_once('=') else {
            return ParsedLine::None;
        };
        match key {
            "frame" => {
                self.current.frame = value.trim().parse().ok();
                ParsedLine::None
            }
            "fps" => {
                self.current.fps = value.trim().parse().ok();
                ParsedLine::None
            }
            "out_time_ms" => {
                self.current.out_time_ms = value.trim().parse().ok();
                ParsedLine::None
            }
            "speed" => {
                self.current.speed = value.trim().trim_end_matches('x').parse().ok();
                ParsedLine::None
            }
            "progress" => {
                if value.trim() == "end" {
                    if self.end_seen {
                        return ParsedLine::None;
                    }
                    self.end_seen = true;
                    return ParsedLine::End;
                }
                let mut block = std::mem::take(&mut self.current);
                if let (Some(frame), Some(total)) = (block.frame, self.total_frames) {
                    if total > 0 {
                        block.percent = Some((frame as f64 / total as f64 * 100.0).min(100.0));
                    }
                }
                ParsedLine::Block(block)
            }
            _ => ParsedLine::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_terminated_by_continue() {
        let mut parser = ProgressParser::new(Some(200));
        assert_eq!(parser.push_line("frame=100"), ParsedLine::None);
        assert_eq!(parser.push_line("fps=25.0"), ParsedLine::None);
        let ParsedLine::Block(block) = parser.push_line("progress=continue") else {
            panic!("expected block");
        };
        assert_eq!(block.frame, Some(100));
        assert_eq!(block.percent, Some(50.0));
    }

    #[test]
    fn end_sentinel_fires_exactly_once() {
        let mut parser = ProgressParser::new(None);
        for n in 0..5 {
            parser.push_line(&format!("frame={n}"));
            parser.push_line("progress=continue");
        }
        assert_eq!(parser.push_line("progress=end"), ParsedLine::End);
        assert_eq!(parser.push_line("progress=end"), ParsedLine::None);
    }

    #[test]
    fn garbage_lines_are_ignored() {
        let mut parser = ProgressParser::new(None);
        assert_eq!(parser.push_line("not a token"), ParsedLine::None);
        assert_eq!(parser.push_line(""), ParsedLine::None);
        assert_eq!(parser.push_line("bitrate=1024.2kbits/s"), ParsedLine::None);
    }
}
