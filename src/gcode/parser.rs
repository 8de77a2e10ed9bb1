/// Marlin command parser for lines received from the panel.
///
/// Never fails: anything it does not recognise becomes [`CommandKind::Unknown`],
/// which still gets acknowledged.
use tft_shared::{PanelDialect, PrintAction};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// M105
    TempReport,
    /// M115
    FirmwareInfo,
    /// M114
    PositionReport,
    /// M92 without arguments
    StepsPerMm,
    /// Capability advertisement sent after the connection handshake.
    Capabilities,
    /// M27
    SdStatus,
    /// M20
    FileList,
    /// M999, repurposed by custom panel screens as a one-line status dump
    StatusLine,
    /// M155 S<seconds>
    AutoReportTemp { interval_s: u64 },
    /// `action:remote pause|resume|cancel`, raw or wrapped in M118
    HostAction(PrintAction),
    Unknown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub kind: CommandKind,
    pub raw_args: String,
}

impl Command {
    pub fn new(kind: CommandKind, raw_args: impl Into<String>) -> Self {
        Self { kind, raw_args: raw_args.into() }
    }

    pub fn unknown() -> Self {
        Self::new(CommandKind::Unknown, "")
    }
}

/// Classify one line with its terminator already removed.
pub fn parse_line(line: &str) -> Command {
    let line = line.trim_matches(|c: char| c.is_whitespace() || c == '\0');
    if line.is_empty() {
        return Command::unknown();
    }

    if let Some(action) = parse_host_action(line) {
        return Command::new(CommandKind::HostAction(action), line);
    }

    let body = strip_framing(line);
    let mut tokens = body.split_whitespace();
    let Some(first) = tokens.next() else {
        return Command::unknown();
    };

    let (code, glued) = split_code(first);
    let Some(code) = code else {
        return Command::unknown();
    };
    let mut args: Vec<&str> = Vec::new();
    if !glued.is_empty() {
        args.push(glued);
    }
    args.extend(tokens);
    let raw_args = args.join(" ");

    let kind = match code.as_str() {
        "M105" => CommandKind::TempReport,
        "M115" => CommandKind::FirmwareInfo,
        "M114" => CommandKind::PositionReport,
        "M92" if args.is_empty() => CommandKind::StepsPerMm,
        "M27" => CommandKind::SdStatus,
        "M20" => CommandKind::FileList,
        "M999" => CommandKind::StatusLine,
        "M155" => match word_value(&args, 'S').and_then(|v| v.parse::<u64>().ok()) {
            Some(interval_s) => CommandKind::AutoReportTemp { interval_s },
            None => {
                tracing::debug!("M155 with unusable arguments '{}'", raw_args);
                CommandKind::Unknown
            }
        },
        _ => CommandKind::Unknown,
    };
    Command::new(kind, raw_args)
}

/// Drop a leading `N<line>` and a trailing `*<checksum>` and `;comment`.
fn strip_framing(line: &str) -> &str {
    let mut body = line;
    if let Some(idx) = body.find(';') {
        body = &body[..idx];
    }
    if let Some(idx) = body.find('*') {
        body = &body[..idx];
    }
    let trimmed = body.trim_start();
    if let Some(rest) = trimmed.strip_prefix(['N', 'n']) {
        let digits = rest.len() - rest.trim_start_matches(|c: char| c.is_ascii_digit()).len();
        if digits > 0 {
            return rest[digits..].trim();
        }
    }
    body.trim()
}

/// Split `M155S2` into (`M155`, `S2`). Returns `None` for tokens that are not
/// a letter followed by digits.
fn split_code(token: &str) -> (Option<String>, &str) {
    let mut chars = token.char_indices();
    let Some((_, letter)) = chars.next() else {
        return (None, "");
    };
    if !letter.is_ascii_alphabetic() {
        return (None, "");
    }
    let digits_end = token[1..]
        .find(|c: char| !c.is_ascii_digit())
        .map(|i| i + 1)
        .unwrap_or(token.len());
    if digits_end == 1 {
        return (None, "");
    }
    let number = &token[1..digits_end];
    // M0105 and M105 are the same command
    let number = number.trim_start_matches('0');
    let number = if number.is_empty() { "0" } else { number };
    let code = format!("{}{}", letter.to_ascii_uppercase(), number);
    (Some(code), &token[digits_end..])
}

fn word_value<'a>(args: &[&'a str], letter: char) -> Option<&'a str> {
    args.iter().find_map(|arg| {
        let mut chars = arg.chars();
        match chars.next() {
            Some(c) if c.eq_ignore_ascii_case(&letter) => Some(chars.as_str()),
            _ => None,
        }
    })
}

/// Guess the panel firmware family from one received line. BTT firmware
/// numbers and checksums its lines; original MKS firmware polls a bare M105.
pub fn detect_dialect(line: &str) -> Option<PanelDialect> {
    let line = line.trim();
    let numbered = line
        .strip_prefix(['N', 'n'])
        .is_some_and(|rest| rest.starts_with(|c: char| c.is_ascii_digit()));
    if numbered || line.contains('*') {
        return Some(PanelDialect::Btt);
    }
    if parse_line(line).kind == CommandKind::TempReport {
        return Some(PanelDialect::Mks);
    }
    None
}

/// Only `//action:...` lines and `M118 ... action:...` count; the same text
/// inside any other command (an M117 message, say) is not a request.
fn parse_host_action(line: &str) -> Option<PrintAction> {
    let lower = line.to_ascii_lowercase();
    let rest = match lower.strip_prefix("//action:") {
        Some(rest) => rest,
        None => {
            let body = strip_framing(&lower);
            let args = body.strip_prefix("m118")?;
            if !args.starts_with(char::is_whitespace) {
                return None;
            }
            let idx = args.find("action:")?;
            &args[idx + "action:".len()..]
        }
    };
    let rest = rest.trim_start().strip_prefix("remote")?;
    let keyword = rest.split_whitespace().next()?;
    PrintAction::from_keyword(keyword.trim_end_matches(|c: char| !c.is_ascii_alphabetic()))
}
