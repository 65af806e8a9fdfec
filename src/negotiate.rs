use crate::registry::{EncoderRegistry, EncoderSpec};

/// Q-values are compared in thousandths, the finest precision HTTP allows.
const MAX_QUALITY: u16 = 1000;

/// The outcome of content-coding negotiation for one request.
#[derive(Debug, Clone)]
pub enum Negotiation {
    /// No acceptable encoding; the body is sent as-is.
    Identity,
    /// Compress with this registered encoding.
    Encoding(EncoderSpec),
}

impl Negotiation {
    /// Name of the selected encoding, or `None` for identity.
    pub fn encoding(&self) -> Option<&str> {
        match self {
            Negotiation::Identity => None,
            Negotiation::Encoding(spec) => Some(spec.name()),
        }
    }
}

/// Selects the encoding to use from `Accept-Encoding` header values.
///
/// Each value is a comma-separated list of codings with optional quality
/// values (e.g. "gzip, br;q=1.0, zstd;q=0.8"). Codings that are not
/// registered, have `q=0`, or carry a malformed quality are ignored. The
/// highest quality wins; equal qualities are resolved by registration order,
/// never by the order the client listed them in.
///
/// Pass `None` when the request has no `Accept-Encoding` header.
pub fn negotiate<'a, I>(accept_encoding: I, registry: &EncoderRegistry) -> Negotiation
where
    I: IntoIterator<Item = &'a str>,
{
    let mut best: Option<(usize, u16)> = None;

    for part in accept_encoding.into_iter().flat_map(|value| value.split(',')) {
        let Some((encoding, quality)) = parse_encoding_with_quality(part) else {
            continue;
        };

        // Skip if quality is 0
        if quality == 0 {
            continue;
        }

        let Some(rank) = registry.position(encoding) else {
            continue;
        };

        let better = match best {
            None => true,
            Some((best_rank, best_quality)) => {
                quality > best_quality || (quality == best_quality && rank < best_rank)
            }
        };
        if better {
            best = Some((rank, quality));
        }
    }

    match best {
        Some((rank, _)) => Negotiation::Encoding(registry.list()[rank].clone()),
        None => Negotiation::Identity,
    }
}

/// Parses an entry like "gzip" or "br;q=0.8" into (encoding, quality in
/// thousandths). Returns `None` for an empty coding or a malformed q-value.
fn parse_encoding_with_quality(s: &str) -> Option<(&str, u16)> {
    let mut parts = s.split(';');
    let encoding = parts.next().unwrap_or("").trim();
    if encoding.is_empty() {
        return None;
    }

    let mut quality = MAX_QUALITY;
    for param in parts {
        let Some((key, value)) = param.split_once('=') else {
            continue;
        };
        if key.trim().eq_ignore_ascii_case("q") {
            quality = parse_qvalue(value.trim())?;
        }
    }

    Some((encoding, quality))
}

/// Parses `qvalue = ( "0" [ "." 0*3DIGIT ] ) / ( "1" [ "." 0*3("0") ] )`.
fn parse_qvalue(s: &str) -> Option<u16> {
    let (int, frac) = match s.split_once('.') {
        Some((int, frac)) => (int, frac),
        None => (s, ""),
    };
    if frac.len() > 3 || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let mut thousandths = 0u16;
    for (i, digit) in frac.bytes().enumerate() {
        thousandths += u16::from(digit - b'0') * [100, 10, 1][i];
    }

    match int {
        "0" => Some(thousandths),
        "1" if thousandths == 0 => Some(MAX_QUALITY),
        _ => None,
    }
}
