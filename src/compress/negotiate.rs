use super::Codec;

/// A parsed `Accept-Encoding` value.
///
/// Weights are parsed numerically: a missing `q` means 1.0, `q=0` excludes
/// the coding, and an unparseable weight is treated as an exclusion. Weights
/// only decide acceptance; the server's priority order picks among accepted
/// codings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AcceptEncoding {
    entries: Vec<(String, f32)>,
}

impl AcceptEncoding {
    pub fn parse(header: &str) -> Self {
        let mut entries: Vec<(String, f32)> = Vec::new();

        for item in header.split(',') {
            let mut params = item.split(';');
            let token = match params.next().map(str::trim) {
                Some(token) if !token.is_empty() => token.to_ascii_lowercase(),
                _ => continue,
            };

            let mut weight = 1.0;
            for param in params {
                if let Some((name, value)) = param.split_once('=') {
                    if name.trim().eq_ignore_ascii_case("q") {
                        weight = parse_weight(value.trim());
                    }
                }
            }

            // First mention wins.
            if !entries.iter().any(|(existing, _)| *existing == token) {
                entries.push((token, weight));
            }
        }

        Self { entries }
    }

    fn weight_of(&self, token: &str) -> Option<f32> {
        self.entries
            .iter()
            .find(|(name, _)| name == token)
            .map(|(_, q)| *q)
    }

    /// Whether `token` is acceptable, either by name or through `*`.
    pub fn accepts(&self, token: &str) -> bool {
        match self.weight_of(token) {
            Some(q) => q > 0.0,
            None => self.weight_of("*").map(|q| q > 0.0).unwrap_or(false),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse_weight(value: &str) -> f32 {
    match value.parse::<f32>() {
        Ok(q) if q.is_finite() => q.clamp(0.0, 1.0),
        _ => 0.0,
    }
}

/// Every codec in `available` the client accepts, in server priority order.
pub fn acceptable(accept_encoding: Option<&str>, available: &[Codec]) -> Vec<Codec> {
    let accepted = match accept_encoding {
        Some(header) => AcceptEncoding::parse(header),
        None => return Vec::new(),
    };
    available
        .iter()
        .copied()
        .filter(|codec| accepted.accepts(codec.token()))
        .collect()
}

/// Picks the first codec in `available` (server priority order) that the
/// client accepts. `None` means the identity body.
pub fn negotiate(accept_encoding: Option<&str>, available: &[Codec]) -> Option<Codec> {
    acceptable(accept_encoding, available).into_iter().next()
}
