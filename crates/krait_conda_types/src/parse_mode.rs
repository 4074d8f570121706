/// Controls how tolerant parsers are of legacy spellings.
///
/// Conda has accumulated a number of spec spellings over the years that are
/// not part of the documented grammar but occur in the wild (`>=1.2.*`,
/// `2023.*.*`, a trailing `.*.`). Lenient parsing accepts and normalizes
/// those, strict parsing rejects them.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub enum ParseStrictness {
    /// Accept legacy spellings and normalize them.
    #[default]
    Lenient,

    /// Only accept the documented grammar.
    Strict,
}
