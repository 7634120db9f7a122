use crate::db::sql::{AnsiDialect, SqlRenderer, Statement};
use sha2::{Digest, Sha256};
use std::fmt;

///
/// StatementFingerprint
///
/// Stable identity of a statement's structure. Two statements share a
/// fingerprint exactly when they render to the same ANSI text; bound values
/// never participate.
///

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct StatementFingerprint([u8; 32]);

impl StatementFingerprint {
    #[must_use]
    pub fn of(statement: &Statement) -> Self {
        let rendered = SqlRenderer::render(&AnsiDialect, statement);

        Self::of_sql(&rendered.sql)
    }

    #[must_use]
    pub fn of_sql(sql: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"stmtfp:v1");
        hasher.update(sql.as_bytes());
        let digest = hasher.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);

        Self(out)
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    #[must_use]
    pub fn as_hex(&self) -> String {
        let mut out = String::with_capacity(64);
        for byte in self.0 {
            use std::fmt::Write as _;
            let _ = write!(out, "{byte:02x}");
        }
        out
    }
}

impl fmt::Display for StatementFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_hex())
    }
}
