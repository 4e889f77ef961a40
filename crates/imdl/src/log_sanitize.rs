use std::iter::Peekable;
use std::str::Chars;

pub const MAX_NOTICE_CHARS: usize = 512;

const TRUNCATION_MARK: &str = "...";

pub fn sanitize_notice_text(input: &str) -> String {
    sanitize_with_limit(input, MAX_NOTICE_CHARS)
}

pub fn sanitize_with_limit(input: &str, max_chars: usize) -> String {
    let mut out = String::with_capacity(input.len().min(max_chars));
    let mut kept = 0usize;
    let mut last_was_space = false;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\x1b' {
            skip_escape(&mut chars);
            continue;
        }

        // Line breaks fold into a single space; a notice is one wrapped paragraph.
        let c = match c {
            '\r' | '\n' | '\t' => ' ',
            c if c.is_control() || is_bidi_control(c) => continue,
            c => c,
        };
        if c == ' ' && (last_was_space || kept == 0) {
            continue;
        }

        if kept >= max_chars {
            out.truncate(out.trim_end().len());
            out.push_str(TRUNCATION_MARK);
            return out;
        }
        last_was_space = c == ' ';
        out.push(c);
        kept += 1;
    }

    out.truncate(out.trim_end().len());
    out
}

fn skip_escape(chars: &mut Peekable<Chars<'_>>) {
    match chars.next() {
        // CSI: parameters until a final byte in '@'..='~'.
        Some('[') => {
            for c in chars.by_ref() {
                if ('@'..='~').contains(&c) {
                    break;
                }
            }
        }
        // OSC: BEL or ST terminated.
        Some(']') => skip_until_st(chars, true),
        // DCS, SOS, PM, APC: ST terminated.
        Some('P' | 'X' | '^' | '_') => skip_until_st(chars, false),
        _ => {}
    }
}

fn skip_until_st(chars: &mut Peekable<Chars<'_>>, bel_ends: bool) {
    while let Some(c) = chars.next() {
        if bel_ends && c == '\x07' {
            return;
        }
        if c == '\x1b' && chars.peek() == Some(&'\\') {
            chars.next();
            return;
        }
    }
}

fn is_bidi_control(c: char) -> bool {
    matches!(c, '\u{061C}' | '\u{200E}' | '\u{200F}')
        || ('\u{202A}'..='\u{202E}').contains(&c)
        || ('\u{2066}'..='\u{2069}').contains(&c)
}
