use std::time::Duration;

use matches::assert_matches;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use structbuf::StructBuf;
use tokio::time::Instant;

use crate::config::{Config, FlowPolicy, Reserve};
use crate::hci::{acl_packet, sco_packet, Boundary, ConnHandle};
use crate::host::mock::Mock;
use crate::Error;

use super::*;

fn h(v: u16) -> ConnHandle {
    ConnHandle::new(v).unwrap()
}

fn pkt(cn: ConnHandle) -> StructBuf {
    acl_packet(cn, Boundary::default(), &[0xAA; 8]).unwrap()
}

fn flow(hw: u16) -> (Flow, Mock) {
    let mut m = Mock::default();
    let mut f = Flow::new(&Config::default());
    f.set_buffer_size(hw, 0, &mut m);
    (f, m)
}

#[test]
fn split_weights() {
    let p = FlowPolicy::default();
    assert_eq!(admission::split(4, [true, false, true], &p), [1, 0, 3]);
    assert_eq!(admission::split(8, [true, true, true], &p), [1, 2, 5]);
    assert_eq!(admission::split(8, [false, true, false], &p), [0, 8, 0]);
    assert_eq!(admission::split(0, [true, true, true], &p), [0, 0, 0]);
    assert_eq!(admission::split(3, [false, false, false], &p), [0, 0, 0]);
    let p = FlowPolicy {
        high_reserve: Reserve::Percent(50),
        ..FlowPolicy::default()
    };
    assert_eq!(admission::split(10, [true, false, true], &p), [1, 0, 9]);
    assert_eq!(admission::split(10, [true, true, false], &p), [3, 7, 0]);
}

#[test]
fn batch_priority() {
    let (hi, lo) = (h(1), h(2));
    let (mut f, mut m) = flow(4);
    f.add_link(hi, LinkKind::Acl, Tier::High);
    f.add_link(lo, LinkKind::Acl, Tier::Low);
    let now = Instant::now();
    assert_eq!(f.admission(LinkKind::Acl).counters().allowed, [1, 0, 3]);

    assert_eq!(f.send(hi, pkt(hi), None, now, &mut m).unwrap(), Admit::Sent);
    assert_eq!(f.send(hi, pkt(hi), None, now, &mut m).unwrap(), Admit::Sent);
    assert_eq!(f.send(lo, pkt(lo), None, now, &mut m).unwrap(), Admit::Sent);

    // One controller buffer left: the batch gives it to the high tier
    let r = (f.send_batch(
        vec![(hi, pkt(hi), None), (hi, pkt(hi), None), (lo, pkt(lo), None)],
        &mut m,
    ))
    .unwrap();
    assert_eq!(r, Admitted { sent: 1, queued: 2 });
    let c = *f.admission(LinkKind::Acl).counters();
    assert_eq!(c.outstanding, [1, 0, 3]);
    assert_eq!(c.queued, [1, 0, 1]);
    assert_eq!(m.acl_handles(), [1, 1, 2, 1]);

    // Low completion frees a low tier buffer
    f.completed(lo, 1, now, &mut m);
    assert_eq!(m.acl_handles(), [1, 1, 2, 1, 2]);
    f.completed(hi, 2, now, &mut m);
    assert_eq!(m.acl_handles(), [1, 1, 2, 1, 2, 1]);
    let c = *f.admission(LinkKind::Acl).counters();
    assert_eq!(c.total_queued, 0);
    assert_eq!(c.total_outstanding, 3);
}

#[test]
fn round_robin() {
    let (a, b) = (h(1), h(2));
    let (mut f, mut m) = flow(1);
    f.add_link(a, LinkKind::Acl, Tier::Mid);
    f.add_link(b, LinkKind::Acl, Tier::Mid);
    let now = Instant::now();
    for (cn, want) in [(a, Admit::Sent), (a, Admit::Queued), (a, Admit::Queued)] {
        assert_eq!(f.send(cn, pkt(cn), None, now, &mut m).unwrap(), want);
    }
    assert_eq!(f.send(b, pkt(b), None, now, &mut m).unwrap(), Admit::Queued);
    f.completed(a, 1, now, &mut m);
    f.completed(a, 1, now, &mut m);
    f.completed(b, 1, now, &mut m);
    assert_eq!(m.acl_handles(), [1, 1, 2, 1]);
}

#[test]
fn tier_hint() {
    let (a, b) = (h(1), h(2));
    let (mut f, mut m) = flow(4);
    f.add_link(a, LinkKind::Acl, Tier::Low);
    f.add_link(b, LinkKind::Acl, Tier::High);
    let now = Instant::now();
    assert_eq!(f.send(a, pkt(a), None, now, &mut m).unwrap(), Admit::Sent);
    assert_eq!(f.send(a, pkt(a), None, now, &mut m).unwrap(), Admit::Queued);
    let r = f.send(a, pkt(a), Some(Tier::High), now, &mut m);
    assert_eq!(r.unwrap(), Admit::Sent);
    let c = *f.admission(LinkKind::Acl).counters();
    assert_eq!(c.outstanding, [1, 0, 1]);

    // Completions release tiers in transmission order
    f.completed(a, 1, now, &mut m);
    let c = *f.admission(LinkKind::Acl).counters();
    assert_eq!((c.outstanding, c.queued), ([1, 0, 1], [0, 0, 0]));
    f.completed(a, 2, now, &mut m);
    assert_eq!(f.admission(LinkKind::Acl).counters().total_outstanding, 0);
}

#[test]
fn disconnect() {
    let (a, b) = (h(1), h(2));
    let (mut f, mut m) = flow(2);
    f.add_link(a, LinkKind::Acl, Tier::Mid);
    f.add_link(b, LinkKind::Acl, Tier::Mid);
    let now = Instant::now();
    for _ in 0..4 {
        f.send(a, pkt(a), None, now, &mut m).unwrap();
    }
    assert_eq!(f.send(b, pkt(b), None, now, &mut m).unwrap(), Admit::Queued);
    assert_eq!(f.remove_link(a, now, &mut m), 2);
    assert_eq!(m.acl_handles(), [1, 1, 2]);
    let c = *f.admission(LinkKind::Acl).counters();
    assert_eq!((c.total_outstanding, c.total_queued), (1, 0));
    assert_matches!(
        f.send(a, pkt(a), None, now, &mut m),
        Err(Error::UnknownDevice(_))
    );
    assert_eq!(f.remove_link(a, now, &mut m), 0);
}

#[test]
fn queue_full() {
    let mut m = Mock::default();
    let mut cfg = Config::default();
    cfg.flow.max_queued_per_tier = 2;
    let mut f = Flow::new(&cfg);
    let a = h(1);
    f.add_link(a, LinkKind::Acl, Tier::Mid);
    let now = Instant::now();
    for _ in 0..2 {
        assert_eq!(f.send(a, pkt(a), None, now, &mut m).unwrap(), Admit::Queued);
    }
    assert_matches!(f.send(a, pkt(a), None, now, &mut m), Err(Error::QueueFull));
    assert_matches!(
        f.send_batch(vec![(a, pkt(a), None)], &mut m),
        Err(Error::QueueFull)
    );
    f.set_buffer_size(8, 0, &mut m);
    assert_eq!(m.acl_handles(), [1, 1]);
}

#[test]
fn write_failure() {
    let a = h(1);
    let (mut f, mut m) = flow(2);
    f.add_link(a, LinkKind::Acl, Tier::Mid);
    m.fail_next(1);
    let now = Instant::now();
    assert_matches!(f.send(a, pkt(a), None, now, &mut m), Err(Error::Host(_)));
    assert_eq!(f.admission(LinkKind::Acl).counters().total_outstanding, 0);
    assert_eq!(f.send(a, pkt(a), None, now, &mut m).unwrap(), Admit::Sent);
}

#[test]
fn drain_write_failure() {
    let a = h(1);
    let (mut f, mut m) = flow(1);
    f.add_link(a, LinkKind::Acl, Tier::Mid);
    let now = Instant::now();
    assert_eq!(f.send(a, pkt(a), None, now, &mut m).unwrap(), Admit::Sent);
    assert_eq!(f.send(a, pkt(a), None, now, &mut m).unwrap(), Admit::Queued);

    // Failed write keeps the packet queued
    m.fail_next(1);
    f.completed(a, 1, now, &mut m);
    let c = *f.admission(LinkKind::Acl).counters();
    assert_eq!((c.total_outstanding, c.queued), (0, [0, 1, 0]));
    assert_eq!(m.acl_handles(), [1]);

    f.set_buffer_size(2, 0, &mut m);
    let c = *f.admission(LinkKind::Acl).counters();
    assert_eq!((c.total_outstanding, c.total_queued), (1, 0));
    assert_eq!(m.acl_handles(), [1, 1]);
}

#[test]
fn batch_write_failure() {
    let a = h(1);
    let (mut f, mut m) = flow(2);
    f.add_link(a, LinkKind::Acl, Tier::Mid);
    m.fail_next(1);
    let r = f.send_batch(vec![(a, pkt(a), None), (a, pkt(a), None)], &mut m);
    assert_eq!(r.unwrap(), Admitted { sent: 0, queued: 2 });
    assert!(m.acl_handles().is_empty());
    assert_eq!(f.admission(LinkKind::Acl).counters().total_queued, 2);

    f.set_buffer_size(2, 0, &mut m);
    assert_eq!(m.acl_handles(), [1, 1]);
    let c = *f.admission(LinkKind::Acl).counters();
    assert_eq!((c.total_outstanding, c.total_queued), (2, 0));
}

#[test]
fn sco_write_failure() {
    let mut m = Mock::default();
    let mut f = Flow::new(&Config::default());
    let s = h(0x10);
    f.set_buffer_size(0, 1, &mut m);
    f.add_link(s, LinkKind::Sco, Tier::Mid);
    let now = Instant::now();
    let sco = || sco_packet(s, &[0; 4]).unwrap();
    assert_eq!(f.send(s, sco(), None, now, &mut m).unwrap(), Admit::Sent);
    assert_eq!(f.send(s, sco(), None, now, &mut m).unwrap(), Admit::Queued);

    m.fail_next(1);
    f.completed(s, 1, now, &mut m);
    assert_eq!((f.sco().outstanding(), f.sco().queued()), (0, 1));
    assert_eq!(m.recorded().sco.len(), 1);

    f.set_buffer_size(0, 1, &mut m);
    assert_eq!((f.sco().outstanding(), f.sco().queued()), (1, 0));
    assert_eq!(m.recorded().sco.len(), 2);
}

#[test]
fn le_shared() {
    let (a, b) = (h(1), h(0x40));
    let (mut f, mut m) = flow(1);
    f.set_le_buffer_size(0, &mut m);
    f.add_link(a, LinkKind::Acl, Tier::Mid);
    f.add_link(b, LinkKind::LeAcl, Tier::Mid);
    let now = Instant::now();
    assert_eq!(f.send(a, pkt(a), None, now, &mut m).unwrap(), Admit::Sent);
    assert_eq!(f.send(b, pkt(b), None, now, &mut m).unwrap(), Admit::Queued);
    f.completed(a, 1, now, &mut m);
    assert_eq!(m.acl_handles(), [1, 0x40]);
}

#[test]
fn admission_invariants() {
    let mut rng = StdRng::seed_from_u64(0x5EED);
    let tiers = [Tier::Low, Tier::Mid, Tier::High];
    for hw in [1, 2, 3, 5, 8] {
        let (mut f, mut m) = flow(hw);
        let links: Vec<_> = (1..=4).map(h).collect();
        let mut done = [0_usize; 4];
        let now = Instant::now();
        for &cn in &links {
            f.add_link(cn, LinkKind::Acl, tiers[rng.gen_range(0..3)]);
        }
        for _ in 0..2000 {
            let i = rng.gen_range(0..links.len());
            let cn = links[i];
            match rng.gen_range(0..10) {
                0..=4 => {
                    let hint = rng.gen_bool(0.2).then(|| tiers[rng.gen_range(0..3)]);
                    let _ = f.send(cn, pkt(cn), hint, now, &mut m);
                }
                5..=7 => {
                    let sent = (m.acl_handles().into_iter())
                        .filter(|&v| v == u16::from(cn))
                        .count();
                    let n = rng.gen_range(1..=3).min(sent - done[i]);
                    done[i] += n;
                    #[allow(clippy::cast_possible_truncation)]
                    f.completed(cn, n as u16, now, &mut m);
                }
                8 => f.set_tier(cn, tiers[rng.gen_range(0..3)], &mut m),
                _ => {
                    let batch = (0..rng.gen_range(1..4))
                        .map(|_| {
                            let cn = links[rng.gen_range(0..links.len())];
                            (cn, pkt(cn), None)
                        })
                        .collect();
                    let _ = f.send_batch(batch, &mut m);
                }
            }
            let c = *f.admission(LinkKind::Acl).counters();
            assert!(c.total_outstanding <= hw);
            assert_eq!(c.total_outstanding, c.outstanding.iter().sum::<u16>());
            assert_eq!(c.total_queued, c.queued.iter().sum::<usize>());
            assert!(c.allowed.iter().sum::<u16>() <= hw);
            for t in 0..3 {
                assert!(c.outstanding[t] <= c.allowed[t], "{c:?}");
            }
            let inflight = m.acl_handles().len() - done.iter().sum::<usize>();
            assert_eq!(usize::from(c.total_outstanding), inflight);
            // Queued packets of a tier imply that the tier or controller is
            // out of buffers.
            for t in 0..3 {
                if c.queued[t] > 0 {
                    assert!(c.outstanding[t] >= c.allowed[t] || c.total_outstanding >= hw);
                }
            }
        }
    }
}

#[tokio::test(start_paused = true)]
async fn sco_guard() {
    let mut m = Mock::default();
    let mut f = Flow::new(&Config::default());
    let s = h(0x10);
    f.set_buffer_size(0, 2, &mut m);
    f.add_link(s, LinkKind::Sco, Tier::Mid);
    let sco = || sco_packet(s, &[0; 4]).unwrap();
    let now = Instant::now();
    assert_eq!(f.send(s, sco(), None, now, &mut m).unwrap(), Admit::Sent);
    assert_eq!(f.send(s, sco(), None, now, &mut m).unwrap(), Admit::Sent);
    assert_eq!(f.send(s, sco(), None, now, &mut m).unwrap(), Admit::Queued);
    assert_eq!(f.deadline(), Some(now + Duration::from_millis(100)));

    // Guard does not fire early
    tokio::time::advance(Duration::from_millis(50)).await;
    f.fire_timers(Instant::now(), &mut m);
    assert_eq!(f.sco().outstanding(), 2);

    tokio::time::advance(Duration::from_millis(50)).await;
    let now = Instant::now();
    f.fire_timers(now, &mut m);
    assert_eq!(m.recorded().sco.len(), 3);
    assert_eq!((f.sco().outstanding(), f.sco().queued()), (1, 0));
    assert_eq!(f.deadline(), Some(now + Duration::from_millis(100)));

    f.completed(s, 1, now, &mut m);
    assert_eq!(f.deadline(), None);
    assert_eq!(f.remove_link(s, now, &mut m), 0);
}

#[test]
fn sco_without_buffers() {
    let mut m = Mock::default();
    let mut f = Flow::new(&Config::default());
    let s = h(0x10);
    f.add_link(s, LinkKind::Sco, Tier::Mid);
    let now = Instant::now();
    let p = sco_packet(s, &[0; 4]).unwrap();
    assert_eq!(f.send(s, p, None, now, &mut m).unwrap(), Admit::Queued);
    f.set_buffer_size(0, 1, &mut m);
    assert_eq!(m.recorded().sco.len(), 1);
    assert_eq!(f.remove_link(s, now, &mut m), 0);
    assert_eq!(f.sco().outstanding(), 0);
}
