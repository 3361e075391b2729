#[cfg(test)]
mod unit_tests {
    use crate::version::{parse_release, SemVer, VersionError};
    use std::cmp::Ordering;

    fn v(s: &str) -> SemVer {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_plain_version() {
        let version = v("v1.2.3");
        assert_eq!(
            (version.major(), version.minor(), version.patch()),
            (1, 2, 3)
        );
        assert_eq!(version.suffix(), "");
        assert!(!version.is_prerelease());
    }

    #[test]
    fn test_parse_suffix() {
        let version = v("v2.0.0-beta.1");
        assert_eq!(version.suffix(), "beta.1");
        assert!(version.is_prerelease());
        assert_eq!(version.to_string(), "v2.0.0-beta.1");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert_eq!("".parse::<SemVer>(), Err(VersionError::Empty));
        assert!(matches!(
            "1.2.3".parse::<SemVer>(),
            Err(VersionError::Format(_))
        ));
        assert!(matches!(
            "v1.2".parse::<SemVer>(),
            Err(VersionError::Format(_))
        ));
        assert!(matches!(
            "v1.2.3.4".parse::<SemVer>(),
            Err(VersionError::Format(_))
        ));
        assert!(matches!(
            "v1.x.3".parse::<SemVer>(),
            Err(VersionError::Component {
                component: "minor",
                ..
            })
        ));
        assert!(matches!(
            "v1.2.+3".parse::<SemVer>(),
            Err(VersionError::Component {
                component: "patch",
                ..
            })
        ));
    }

    #[test]
    fn test_component_overflow_is_error() {
        assert!(matches!(
            "v256.0.0".parse::<SemVer>(),
            Err(VersionError::Component {
                component: "major",
                ..
            })
        ));
        assert_eq!(v("v255.255.255"), SemVer::new(255, 255, 255));
    }

    #[test]
    fn test_round_trip() {
        for text in ["v0.0.0", "v1.5.0", "v255.0.17-rc2", "v3.1.4-beta-2"] {
            let parsed = v(text);
            let again = v(&parsed.to_string());
            assert_eq!(again, parsed);
            assert_eq!(again.suffix(), parsed.suffix());
            assert_eq!(again.to_string(), text);
        }
    }

    #[test]
    fn test_stable_greater_than_prerelease() {
        for suffix in ["alpha", "rc1", "zzz"] {
            let stable = SemVer::new(1, 4, 0);
            let pre = SemVer::new(1, 4, 0).with_suffix(suffix);
            assert_eq!(stable.cmp(&pre), Ordering::Greater);
            assert_eq!(pre.cmp(&stable), Ordering::Less);
        }
    }

    #[test]
    fn test_numeric_before_suffix() {
        assert!(v("v1.4.1-rc1") > v("v1.4.0"));
        assert!(v("v1.10.0") > v("v1.9.9"));
        assert!(v("v2.0.0") > v("v1.255.255"));
        assert_eq!(v("v1.0.0-rc1").cmp(&v("v1.0.0-rc2")), Ordering::Equal);
    }

    #[test]
    fn test_total_order_properties() {
        let versions: Vec<SemVer> = [
            "v0.9.9", "v1.0.0-rc1", "v1.0.0", "v1.0.1-alpha", "v1.0.1", "v1.2.0", "v2.0.0-beta",
        ]
        .iter()
        .map(|s| v(s))
        .collect();

        for a in &versions {
            for b in &versions {
                assert_eq!(a.cmp(b), b.cmp(a).reverse(), "antisymmetry {a} {b}");
                for c in &versions {
                    if a < b && b < c {
                        assert!(a < c, "transitivity {a} {b} {c}");
                    }
                }
            }
        }

        let mut shuffled = versions.clone();
        shuffled.reverse();
        shuffled.sort();
        assert_eq!(shuffled, versions);
    }

    #[test]
    fn test_parse_release_strips_app_name() {
        assert_eq!(parse_release("hostd v1.2.3").unwrap(), v("v1.2.3"));
        assert_eq!(parse_release("v1.2.3").unwrap(), v("v1.2.3"));
        assert!(parse_release("hostd 1.2.3").is_err());
        assert!(parse_release("").is_err());
    }

    #[test]
    fn test_serde_text_form() {
        let json = serde_json::to_string(&v("v1.6.0-rc1")).unwrap();
        assert_eq!(json, r#""v1.6.0-rc1""#);
        let back: SemVer = serde_json::from_str(&json).unwrap();
        assert_eq!(back.to_string(), "v1.6.0-rc1");
        assert!(serde_json::from_str::<SemVer>(r#""1.6.0""#).is_err());
    }
}
