//! Protocol-wide constants.

/// Protocol name baked into every domain descriptor (spec §4.3/§6).
pub const PROTOCOL_NAME: &str = "FlowKernel";

/// Protocol version baked into every domain descriptor. Bump this whenever
/// the canonical struct-hash field list changes, so signatures never
/// replay across incompatible versions.
pub const PROTOCOL_VERSION: &str = "1";

/// Acceptance tag a code-bearing grantor's verification hook must return
/// for its signature to be accepted (spec §4.3/§6, modeled on ERC-1271's
/// `isValidSignature` magic value).
pub const CODE_VERIFIER_MAGIC: [u8; 4] = [0x16, 0x26, 0xba, 0x7e];

/// secp256k1 group order, used to determine the low-`s` half (spec §4.3:
/// "enforce low-s").
pub const SECP256K1_ORDER: [u8; 32] = [
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xfe,
    0xba, 0xae, 0xdc, 0xe6, 0xaf, 0x48, 0xa0, 0x3b, 0xbf, 0xd2, 0x5e, 0x8c, 0xd0, 0x36, 0x41, 0x41,
];

/// Basis-points denominator used by `DestinationTarget::target_bps` (spec §3).
pub const BPS_DENOMINATOR: u32 = 10_000;
