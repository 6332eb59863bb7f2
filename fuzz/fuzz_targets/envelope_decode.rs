#![no_main]

use fedbroker_core::{ClusterIdentity, Envelope, Hop, LegKind};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(mut envelope) = Envelope::decode(data) else {
        return;
    };
    let before = envelope.headers.hop_count();
    let identity = ClusterIdentity::new("fuzz", "a").expect("identity");
    let hop = Hop::across(LegKind::Federation, &identity, None, None);
    assert_eq!(envelope.headers.record_hop(hop), before + 1);
    let encoded = envelope.encode().expect("decoded envelopes re-encode");
    let again = Envelope::decode(&encoded).expect("re-encoded envelopes decode");
    assert_eq!(again.headers.hop_count(), before + 1);
});
