//! Reproducible N+E placement.
//!
//! The coordinate of an object is a pure function of its id and the
//! static repository geometry. Reads recompute it and must land on the
//! blocks a prior write used, on any host and with any build, so every
//! step here is fixed arithmetic: a base-33 Horner hash, glibc's
//! `rand_r` recurrence for the per-dimension multipliers, and
//! multiply-shift hashing `(a * x) >> 32`.

use serde::Serialize;

use crate::error::{DalError, DalResult};

/// Placement geometry of an MC repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// Data blocks per stripe.
    pub n: u32,
    /// Erasure blocks per stripe.
    pub e: u32,
    /// Number of pods.
    pub num_pods: u32,
    /// Capacitors per pod.
    pub num_cap: u32,
    /// Scatter directories per capacitor.
    pub scatter_width: u32,
}

impl Geometry {
    /// Blocks in one stripe. Saturates for geometries that
    /// [`validate`](Self::validate) rejects.
    pub fn num_blocks(&self) -> u32 {
        self.n.saturating_add(self.e)
    }

    /// Rejects zero divisors and stripes whose block count overflows.
    pub fn validate(&self) -> DalResult<()> {
        let divisors = [
            ("n", self.n),
            ("num_pods", self.num_pods),
            ("num_cap", self.num_cap),
            ("scatter_width", self.scatter_width),
        ];
        if let Some((key, _)) = divisors.iter().find(|(_, v)| *v == 0) {
            return Err(DalError::InvalidOption {
                key: key.to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.n.checked_add(self.e).is_none() {
            return Err(DalError::InvalidOption {
                key: "e".to_string(),
                reason: format!("{}+{} blocks overflow a stripe", self.n, self.e),
            });
        }
        Ok(())
    }
}

/// Placement coordinate of one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Placement {
    /// Pod index.
    pub pod: u32,
    /// Capacitor index.
    pub cap: u32,
    /// Block index of the first data block.
    pub start_block: u32,
    /// Scatter directory index.
    pub scatter: u32,
}

/// Horner evaluation at x = 33 over the bytes of `s`.
///
/// Bytes are sign-extended, matching a signed `char` walk. The empty
/// string hashes to 0.
pub fn polyhash(s: &str) -> u64 {
    let mut bytes = s.bytes().map(|b| b as i8 as i64 as u64);
    let mut h = match bytes.next() {
        Some(first) => first,
        None => return 0,
    };
    for c in bytes {
        h = h.wrapping_mul(33).wrapping_add(c);
    }
    h
}

/// glibc `rand_r`: three rounds of the LCG folded into 31 bits.
pub fn rand_r(seed: &mut u32) -> i32 {
    let mut next = *seed;

    next = next.wrapping_mul(1_103_515_245).wrapping_add(12_345);
    let mut result = (next / 65_536) % 2_048;

    next = next.wrapping_mul(1_103_515_245).wrapping_add(12_345);
    result <<= 10;
    result ^= (next / 65_536) % 1_024;

    next = next.wrapping_mul(1_103_515_245).wrapping_add(12_345);
    result <<= 10;
    result ^= (next / 65_536) % 1_024;

    *seed = next;
    result as i32
}

/// Odd multiplier derived from one `rand_r` draw.
///
/// The doubling is done in 32-bit signed arithmetic and the result
/// sign-extended to 64 bits, so multipliers of existing repositories are
/// reproduced exactly.
fn multiplier(seed: &mut u32) -> u64 {
    let r = rand_r(seed);
    r.wrapping_mul(2).wrapping_add(1) as i64 as u64
}

/// Multiply-shift hash `(a * key) >> 32`.
pub fn h_a(key: u64, a: u64) -> u64 {
    a.wrapping_mul(key) >> 32
}

/// Computes the placement coordinate of `objid`.
///
/// Every count in `geometry` must be non-zero; configuration rejects
/// zero divisors before a driver exists.
pub fn compute(objid: &str, geometry: &Geometry) -> Placement {
    let hash = polyhash(objid);
    let mut seed = hash as u32;
    let a = [
        multiplier(&mut seed),
        multiplier(&mut seed),
        multiplier(&mut seed),
    ];

    Placement {
        pod: (hash % geometry.num_pods as u64) as u32,
        cap: (h_a(hash, a[0]) % geometry.num_cap as u64) as u32,
        scatter: (h_a(hash, a[1]) % geometry.scatter_width as u64) as u32,
        start_block: (h_a(hash, a[2]) % geometry.num_blocks() as u64) as u32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> Geometry {
        Geometry {
            n: 10,
            e: 2,
            num_pods: 4,
            num_cap: 4,
            scatter_width: 128,
        }
    }

    #[test]
    fn test_polyhash_horner() {
        assert_eq!(polyhash(""), 0);
        assert_eq!(polyhash("a"), 97);
        assert_eq!(polyhash("ab"), 97 * 33 + 98);
        assert_eq!(polyhash("abc"), (97 * 33 + 98) * 33 + 99);
    }

    #[test]
    fn test_polyhash_sign_extends_high_bytes() {
        // "é" is 0xC3 0xA9 in UTF-8
        let c3 = 0xC3u8 as i8 as i64 as u64;
        let a9 = 0xA9u8 as i8 as i64 as u64;
        assert_eq!(polyhash("é"), c3.wrapping_mul(33).wrapping_add(a9));
    }

    #[test]
    fn test_geometry_validate() {
        assert!(geometry().validate().is_ok());

        let g = Geometry {
            n: u32::MAX,
            e: 1,
            ..geometry()
        };
        assert_eq!(g.num_blocks(), u32::MAX);
        match g.validate() {
            Err(DalError::InvalidOption { key, .. }) => assert_eq!(key, "e"),
            other => panic!("expected overflow error, got {:?}", other),
        }

        let g = Geometry {
            scatter_width: 0,
            ..geometry()
        };
        match g.validate() {
            Err(DalError::InvalidOption { key, .. }) => assert_eq!(key, "scatter_width"),
            other => panic!("expected zero divisor error, got {:?}", other),
        }
    }

    #[test]
    fn test_rand_r_matches_glibc() {
        // reference values from glibc rand_r
        let mut seed = 1u32;
        assert_eq!(rand_r(&mut seed), 476_707_713);
        assert_eq!(rand_r(&mut seed), 1_186_278_907);
        assert_eq!(rand_r(&mut seed), 505_671_508);
    }

    #[test]
    fn test_rand_r_is_31_bits() {
        let mut seed = 0xdead_beefu32;
        for _ in 0..1000 {
            assert!(rand_r(&mut seed) >= 0);
        }
    }

    #[test]
    fn test_multipliers_are_odd() {
        let mut seed = 12_345u32;
        for _ in 0..100 {
            assert_eq!(multiplier(&mut seed) & 1, 1);
        }
    }

    #[test]
    fn test_h_a_wraps() {
        assert_eq!(h_a(1, 1 << 32), 1);
        assert_eq!(h_a(u64::MAX, 2), (u64::MAX.wrapping_mul(2)) >> 32);
    }

    #[test]
    fn test_pod_is_hash_mod_pods() {
        let g = geometry();
        for objid in ["a", "ver.001/x/y", "obj.12345"] {
            let p = compute(objid, &g);
            assert_eq!(p.pod as u64, polyhash(objid) % 4);
        }
    }

    #[test]
    fn test_compute_in_range_and_stable() {
        let g = geometry();
        for i in 0..500 {
            let objid = format!("ver.001_007/obj.{}", i);
            let p = compute(&objid, &g);
            assert!(p.pod < g.num_pods);
            assert!(p.cap < g.num_cap);
            assert!(p.scatter < g.scatter_width);
            assert!(p.start_block < g.num_blocks());
            assert_eq!(p, compute(&objid, &g));
        }
    }

    #[test]
    fn test_known_placements() {
        let g = geometry();
        assert_eq!(
            compute("ver.001/obj.1", &g),
            Placement {
                pod: 1,
                cap: 2,
                start_block: 2,
                scatter: 0
            }
        );
        let long = "proxy1/bparent/ver.001_002/ns.root/F___/inode.0000012345/\
                    md_ctime.20230101_000000+0000_1/obj_ctime.20230101_000000+0000_1/\
                    unq.0/chnksz.40000000/chnkno.0";
        assert_eq!(
            compute(long, &g),
            Placement {
                pod: 0,
                cap: 1,
                start_block: 11,
                scatter: 45
            }
        );
    }

    #[test]
    fn test_single_slot_geometry() {
        let g = Geometry {
            n: 1,
            e: 0,
            num_pods: 1,
            num_cap: 1,
            scatter_width: 1,
        };
        let p = compute("anything", &g);
        assert_eq!(
            p,
            Placement {
                pod: 0,
                cap: 0,
                start_block: 0,
                scatter: 0
            }
        );
    }
}
