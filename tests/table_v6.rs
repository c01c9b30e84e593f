mod common {
    use std::io::Write;

    pub fn init() {
        let _ = env_logger::builder()
            .format(|buf, record| writeln!(buf, "{}", record.args()))
            .is_test(true)
            .try_init();
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv6Addr;
    use std::ops::ControlFlow;
    use std::str::FromStr;

    use inetnum::addr::Prefix;
    use lpm_table::{LpmError, LpmTable};

    use crate::common;

    fn octets(addr: &str) -> [u8; 16] {
        Ipv6Addr::from_str(addr).unwrap().octets()
    }

    #[test]
    fn scenario_zero_route() {
        common::init();
        let mut t = LpmTable::<u32>::new("v6").unwrap();
        t.add(&octets("::"), 0, 1).unwrap();

        let res = t.search(&octets("2001:db8::1"));
        assert_eq!(res.value, Some(&1));
        assert!(!res.used_default);
    }

    #[test]
    fn scenario_nested_bindings() {
        common::init();
        let mut t = LpmTable::<u32>::new("v6").unwrap();
        t.add(&octets("::"), 0, 1).unwrap();
        t.add(&octets("2001:db8::"), 32, 2).unwrap();
        t.add(&octets("2001:db8:cafe::"), 48, 3).unwrap();

        assert_eq!(t.search(&octets("2001:db8:cafe::17")).value, Some(&3));
        assert_eq!(t.search(&octets("2001:db8:beef::17")).value, Some(&2));
        assert_eq!(t.search(&octets("2002::1")).value, Some(&1));
        assert_eq!(t.find(&octets("2001:db8::"), 32), Some(&2));
        assert_eq!(t.find(&octets("2001:db8:cafe::"), 64), None);

        t.delete(&octets("2001:db8:cafe::"), 48).unwrap();
        assert_eq!(t.search(&octets("2001:db8:cafe::17")).value, Some(&2));
    }

    #[test]
    fn full_length_host_route() {
        common::init();
        let mut t = LpmTable::<u32>::new("v6").unwrap();
        let host = octets("2001:db8::dead:beef");
        t.add(&octets("2001:db8::"), 32, 1).unwrap();
        t.add(&host, 128, 2).unwrap();

        // The /128 occupies all sixteen mtrie levels.
        assert_eq!(t.statistics().mtrie_blocks, 16);
        assert_eq!(t.search(&host).value, Some(&2));
        let mut neighbour = host;
        neighbour[15] ^= 1;
        assert_eq!(t.search(&neighbour).value, Some(&1));

        t.delete(&host, 128).unwrap();
        assert_eq!(t.search(&host).value, Some(&1));
        // All blocks below the /32's own level are reclaimed.
        assert_eq!(t.statistics().mtrie_blocks, 4);
    }

    #[test]
    fn odd_masklen_within_a_stride() {
        common::init();
        let mut t = LpmTable::<u32>::new("v6").unwrap();
        // /35 ends three bits into the fifth byte.
        t.add(&octets("2001:db8:e000::"), 35, 7).unwrap();

        assert_eq!(t.search(&octets("2001:db8:ff00::1")).value, Some(&7));
        assert_eq!(t.search(&octets("2001:db8:1fff::1")).value, None);

        // A more specific /37 carves its slice out on update.
        t.add(&octets("2001:db8:f800::"), 37, 8).unwrap();
        t.update(&octets("2001:db8:e000::"), 35, 9).unwrap();
        assert_eq!(t.search(&octets("2001:db8:f900::1")).value, Some(&8));
        assert_eq!(t.search(&octets("2001:db8:e100::1")).value, Some(&9));
    }

    #[test]
    fn default_data_for_v6() {
        common::init();
        let mut t = LpmTable::<u32>::new("v6").unwrap();
        t.add(&octets("2001:db8::"), 32, 2).unwrap();
        t.update_default(&octets("2001:db8::"), 32).unwrap();

        let res = t.search(&octets("fe80::1"));
        assert_eq!(res.value, Some(&2));
        assert!(res.used_default);

        t.delete_default().unwrap();
        let res = t.search(&octets("fe80::1"));
        assert_eq!(res.value, None);
        assert!(res.used_default);
    }

    #[test]
    fn walk_reconstructs_v6_prefixes() {
        common::init();
        let mut t = LpmTable::<u32>::new("v6").unwrap();
        let prefixes =
            ["2001:db8::/32", "2001:db8:cafe::/48", "fe80::/10", "::/0"];
        for (n, p) in prefixes.iter().enumerate() {
            let pfx = Prefix::from_str(p).unwrap();
            t.add_prefix(&pfx, n as u32).unwrap();
        }

        let mut seen = Vec::new();
        t.walk(|addr, masklen, value| {
            let bytes: [u8; 16] = addr.try_into().unwrap();
            let pfx =
                Prefix::new(Ipv6Addr::from(bytes).into(), masklen).unwrap();
            seen.push((pfx.to_string(), *value));
            ControlFlow::Continue(())
        })
        .unwrap();

        assert_eq!(seen.len(), prefixes.len());
        for (n, p) in prefixes.iter().enumerate() {
            let pfx = Prefix::from_str(p).unwrap();
            assert!(
                seen.contains(&(pfx.to_string(), n as u32)),
                "missing {}",
                p
            );
        }
    }

    #[test]
    fn masklen_beyond_the_maximum_is_invalid() {
        common::init();
        let mut t = LpmTable::<u32>::new("v6").unwrap();
        assert_eq!(
            t.add(&octets("::1"), 129, 1).unwrap_err(),
            LpmError::Invalid
        );
        assert_eq!(t.find(&octets("::1"), 129), None);
    }
}
