/// A parsed image reference such as `registry.example.com:5000/team/app:2.0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageReference<'a> {
    raw: &'a str,
    repository: &'a str,
    tag: Option<&'a str>,
    digest: Option<&'a str>,
}

impl<'a> ImageReference<'a> {
    pub fn parse(raw: &'a str) -> Self {
        // Handle digest references (image@sha256:...)
        if let Some(at_pos) = raw.find('@') {
            return Self {
                raw,
                repository: &raw[..at_pos],
                tag: None,
                digest: Some(&raw[at_pos + 1..]),
            };
        }

        // A colon followed by a slash belongs to a registry port
        // e.g., localhost:5000/myimage
        if let Some(colon_pos) = raw.rfind(':') {
            let after_colon = &raw[colon_pos + 1..];
            if !after_colon.contains('/') {
                return Self {
                    raw,
                    repository: &raw[..colon_pos],
                    tag: Some(after_colon),
                    digest: None,
                };
            }
        }

        Self {
            raw,
            repository: raw,
            tag: None,
            digest: None,
        }
    }

    pub fn repository(&self) -> &'a str {
        self.repository
    }

    /// The value the engine expects in the `tag` pull parameter. Untagged
    /// references resolve to `latest`.
    pub fn tag_or_digest(&self) -> Option<&'a str> {
        match (self.tag, self.digest) {
            (_, Some(digest)) => Some(digest),
            (Some(tag), None) => Some(tag),
            (None, None) => Some("latest"),
        }
    }

    /// Registry host the reference points to, `None` for the default public
    /// registry.
    ///
    /// Only the first path segment counts, and only when it looks like a host
    /// (contains a `.` or a `:`).
    pub fn registry_host(&self) -> Option<&'a str> {
        let slash = self.raw.find('/')?;
        let candidate = &self.raw[..slash];
        if !candidate.is_empty() && candidate.contains(['.', ':']) {
            Some(candidate)
        } else {
            None
        }
    }
}

impl std::fmt::Display for ImageReference<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.raw)
    }
}
