//! Pattern dispatch over received lines
//!
//! Every registered pattern is tried at every line index of a frame. Hits
//! are applied in ascending line order and each handler turns its capture
//! into [`Prop`]s, the structured facts the session reacts to. Patterns that
//! carry a PDU (`+CMGR`, `+CMGL`, `+CMT`, `+CDS`) only match when the next
//! line is a hex PDU whose TP length equals the length the header declares;
//! otherwise the PDU is taken as not yet arrived.
//!
//! Lines nobody claimed may be retained as residue. On the next frame the
//! last residue line is progressively joined with the new lines until some
//! pattern covers it, which reassembles notifications a modem split across
//! writes. The residue is capped at [`MAX_RESIDUE_LINES`].

use serde::{Deserialize, Serialize};
use smsgate_pdu::{pdu, tp_length, CodingScheme};
use tracing::{debug, trace, warn};

use crate::driver::DriverProfile;
use crate::error::ModemErrorKind;
use crate::matcher::{Capture, Template};

/// Upper bound on retained unprocessed lines
pub const MAX_RESIDUE_LINES: usize = 16;

/// A structured fact extracted from modem output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "prop", rename_all = "kebab-case")]
pub enum Prop {
    /// A message was stored (`+CMTI`)
    StoredMessage {
        /// Storage name
        storage: String,
        /// Slot index
        index: u32,
    },
    /// A status report was stored (`+CDSI`)
    StoredReport {
        /// Storage name
        storage: String,
        /// Slot index
        index: u32,
    },
    /// A PDU delivered directly or read from storage
    Pdu {
        /// Slot index when listed (`+CMGL`)
        index: Option<u32>,
        /// Message status from the header (0 unread, 1 read, ...)
        status: Option<u8>,
        /// Hex PDU
        pdu: String,
    },
    /// Signal quality
    Signal {
        /// RSSI index 0-31, 99 unknown
        rssi: u8,
        /// Bit error rate, when reported
        ber: Option<u8>,
    },
    /// Incoming call
    Ring,
    /// Caller line identification
    Caller {
        /// Calling number
        number: String,
    },
    /// USSD reply
    Ussd {
        /// Session status (0 done, 1 further action, 2 terminated)
        status: u8,
        /// Payload as received
        message: String,
        /// Data coding scheme of the payload
        dcs: Option<u8>,
    },
    /// Storage full notification
    MemoryFull {
        /// Storage name, when reported
        storage: Option<String>,
    },
    /// Storage usage (`+CPMS`)
    Storage {
        /// Storage name, absent in set-command replies
        name: Option<String>,
        /// Used slots
        used: u32,
        /// Total slots
        total: u32,
    },
    /// Service centre address
    Smsc {
        /// SMSC number
        number: String,
    },
    /// Registered operator
    Network {
        /// Operator name or numeric id
        operator: String,
    },
    /// Active TE character set
    Charset {
        /// Character set name
        charset: String,
    },
    /// SMS mode
    SmsMode {
        /// true in PDU mode
        pdu: bool,
    },
    /// Message reference assigned to a sent PDU (`+CMGS`)
    Sent {
        /// TP-MR
        reference: u8,
    },
    /// Error-class diagnostic
    ModemError {
        /// Result code class
        kind: ModemErrorKind,
        /// Numeric code, if any
        code: Option<u16>,
        /// Raw diagnostic text
        diagnostic: String,
    },
}

/// A pattern hit, handed to the handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hit {
    /// Index of the pattern in the registry
    pub pattern: usize,
    /// Matched template span
    pub capture: Capture,
    /// Hex PDU line for PDU-bearing patterns
    pub pdu: Option<String>,
    /// Last line index covered, PDU line included
    pub end: usize,
}

/// Turns a hit into props
pub type Handler = fn(&Hit) -> Vec<Prop>;

/// One registered response pattern
#[derive(Clone)]
pub struct Pattern {
    /// Driver template id
    pub id: &'static str,
    /// Minimum token count for a match
    pub min_tokens: usize,
    /// Separator for quoted values continuing over several lines
    pub join: Option<&'static str>,
    /// Whether a hex PDU line must follow the header
    pub pdu: bool,
    /// Field extraction
    pub handler: Handler,
}

impl std::fmt::Debug for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pattern")
            .field("id", &self.id)
            .field("min_tokens", &self.min_tokens)
            .field("join", &self.join)
            .field("pdu", &self.pdu)
            .finish()
    }
}

impl Pattern {
    /// Pattern without PDU or join
    pub fn new(id: &'static str, min_tokens: usize, handler: Handler) -> Self {
        Self {
            id,
            min_tokens,
            join: None,
            pdu: false,
            handler,
        }
    }

    /// Require a hex PDU line after the header
    pub fn with_pdu(mut self) -> Self {
        self.pdu = true;
        self
    }

    /// Continue quoted values across lines
    pub fn with_join(mut self, join: &'static str) -> Self {
        self.join = Some(join);
        self
    }
}

/// Result of processing one frame
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// Props in line order
    pub props: Vec<Prop>,
    /// Per-line flag: claimed by some pattern
    pub consumed: Vec<bool>,
}

impl ProcessOutcome {
    /// Lines of `frame` that no pattern claimed
    pub fn unprocessed(&self, frame: &[String]) -> Vec<String> {
        frame
            .iter()
            .zip(self.consumed.iter())
            .filter(|(_, consumed)| !**consumed)
            .map(|(line, _)| line.clone())
            .collect()
    }
}

/// Pattern registry plus the residue of unclaimed lines
#[derive(Debug, Clone)]
pub struct ResponseProcessor {
    patterns: Vec<Pattern>,
    residue: Vec<String>,
}

impl Default for ResponseProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseProcessor {
    /// Registry with the standard patterns
    pub fn new() -> Self {
        Self {
            patterns: vec![
                Pattern::new("RESPONSE_CMTI", 2, handle_cmti),
                Pattern::new("RESPONSE_CDSI", 2, handle_cdsi),
                Pattern::new("RESPONSE_CMT", 1, handle_pdu_header).with_pdu(),
                Pattern::new("RESPONSE_CDS", 1, handle_pdu_header).with_pdu(),
                Pattern::new("RESPONSE_CMGR", 2, handle_pdu_header).with_pdu(),
                Pattern::new("RESPONSE_CMGL", 3, handle_cmgl).with_pdu(),
                Pattern::new("RESPONSE_CMGS", 1, handle_cmgs),
                Pattern::new("RESPONSE_RING", 0, |_| vec![Prop::Ring]),
                Pattern::new("RESPONSE_CLIP", 1, handle_clip),
                Pattern::new("RESPONSE_CUSD", 1, handle_cusd).with_join("\n"),
                Pattern::new("RESPONSE_CSQ", 1, handle_signal),
                Pattern::new("RESPONSE_RSSI", 1, handle_signal),
                Pattern::new("RESPONSE_MEMORY_FULL", 0, handle_memory_full),
                Pattern::new("RESPONSE_CPMS", 2, handle_cpms),
                Pattern::new("RESPONSE_CSCA", 1, handle_csca),
                Pattern::new("RESPONSE_COPS", 1, handle_cops),
                Pattern::new("RESPONSE_CSCS", 1, handle_cscs),
                Pattern::new("RESPONSE_CMGF", 1, handle_cmgf),
                Pattern::new("RESPONSE_CME", 1, |hit| {
                    handle_error(hit, ModemErrorKind::Cme)
                }),
                Pattern::new("RESPONSE_CMS", 1, |hit| {
                    handle_error(hit, ModemErrorKind::Cms)
                }),
            ],
            residue: Vec::new(),
        }
    }

    /// Add a pattern
    pub fn register(&mut self, pattern: Pattern) {
        self.patterns.push(pattern);
    }

    /// Registered patterns
    pub fn patterns(&self) -> &[Pattern] {
        &self.patterns
    }

    /// Lines currently retained for resync
    pub fn residue(&self) -> &[String] {
        &self.residue
    }

    /// Retain unclaimed lines for the next frame, dropping the oldest
    /// beyond [`MAX_RESIDUE_LINES`]
    pub fn retain(&mut self, lines: Vec<String>) {
        self.residue.extend(lines);
        if self.residue.len() > MAX_RESIDUE_LINES {
            let excess = self.residue.len() - MAX_RESIDUE_LINES;
            let dropped: Vec<String> = self.residue.drain(..excess).collect();
            warn!(dropped = excess, lines = ?dropped, "discarding unresolved modem output");
        }
    }

    /// Forget retained lines
    pub fn clear_residue(&mut self) {
        self.residue.clear();
    }

    fn compile(&self, driver: &DriverProfile) -> Vec<(usize, Template)> {
        self.patterns
            .iter()
            .enumerate()
            .filter_map(|(i, p)| Template::from_driver(driver, p.id).map(|t| (i, t)))
            .collect()
    }

    /// All non-overlapping hits in `lines`, in line order
    fn scan(&self, templates: &[(usize, Template)], lines: &[String]) -> Vec<Hit> {
        let mut hits = Vec::new();
        for at in 0..lines.len() {
            for (index, template) in templates {
                let pattern = &self.patterns[*index];
                let Some(capture) = template.match_at(lines, at, pattern.join) else {
                    continue;
                };
                if capture.tokens.len() < pattern.min_tokens {
                    continue;
                }
                let mut hit = Hit {
                    pattern: *index,
                    end: capture.end,
                    capture,
                    pdu: None,
                };
                if pattern.pdu {
                    match attached_pdu(lines, &hit.capture) {
                        Some(pdu) => {
                            hit.end += 1;
                            hit.pdu = Some(pdu);
                        }
                        None => continue,
                    }
                }
                hits.push(hit);
                break;
            }
        }

        // Earliest start wins; drop hits overlapping an accepted one
        let mut accepted: Vec<Hit> = Vec::with_capacity(hits.len());
        for hit in hits {
            if accepted
                .last()
                .is_some_and(|prev| hit.capture.start <= prev.end)
            {
                continue;
            }
            accepted.push(hit);
        }
        accepted
    }

    /// Process a frame as-is, without touching the residue
    pub fn process(&self, driver: &DriverProfile, frame: &[String]) -> ProcessOutcome {
        let templates = self.compile(driver);
        let hits = self.scan(&templates, frame);
        let mut outcome = ProcessOutcome {
            props: Vec::new(),
            consumed: vec![false; frame.len()],
        };
        for hit in hits {
            let pattern = &self.patterns[hit.pattern];
            trace!(pattern = pattern.id, start = hit.capture.start, end = hit.end, "pattern hit");
            for flag in &mut outcome.consumed[hit.capture.start..=hit.end] {
                *flag = true;
            }
            outcome.props.extend((pattern.handler)(&hit));
        }
        outcome
    }

    /// Process an unsolicited frame, first trying to resync the residue
    ///
    /// Returns the effective frame (which may include merged residue lines)
    /// together with the outcome. The caller decides what to retain.
    pub fn process_unsolicited(
        &mut self,
        driver: &DriverProfile,
        lines: Vec<String>,
    ) -> (Vec<String>, ProcessOutcome) {
        let frame = self.resync(driver, lines);
        let outcome = self.process(driver, &frame);
        (frame, outcome)
    }

    fn resync(&mut self, driver: &DriverProfile, lines: Vec<String>) -> Vec<String> {
        if self.residue.is_empty() || lines.is_empty() {
            return lines;
        }
        let templates = self.compile(driver);
        let last = self.residue.len() - 1;

        for merged in 0..=lines.len() {
            let mut candidate = self.residue.clone();
            if merged > 0 {
                candidate[last].push_str(&lines[..merged].concat());
            }
            candidate.extend_from_slice(&lines[merged..]);

            let covered = self
                .scan(&templates, &candidate)
                .iter()
                .any(|hit| hit.capture.start <= last && last <= hit.end);
            if covered {
                debug!(residue = self.residue.len(), merged, "resynchronized fragmented output");
                self.residue.clear();
                return candidate;
            }
        }
        lines
    }
}

/// The hex PDU line following a header, if its TP length matches
fn attached_pdu(lines: &[String], header: &Capture) -> Option<String> {
    let declared: usize = header.tokens.last()?.parse().ok()?;
    let line = lines.get(header.end + 1)?;
    (tp_length(line) == Some(declared)).then(|| line.clone())
}

fn parse<T: std::str::FromStr>(token: Option<&String>) -> Option<T> {
    token.and_then(|t| t.trim().parse().ok())
}

fn handle_cmti(hit: &Hit) -> Vec<Prop> {
    let t = &hit.capture.tokens;
    match parse(t.get(1)) {
        Some(index) => vec![Prop::StoredMessage {
            storage: t[0].clone(),
            index,
        }],
        None => Vec::new(),
    }
}

fn handle_cdsi(hit: &Hit) -> Vec<Prop> {
    let t = &hit.capture.tokens;
    match parse(t.get(1)) {
        Some(index) => vec![Prop::StoredReport {
            storage: t[0].clone(),
            index,
        }],
        None => Vec::new(),
    }
}

fn handle_pdu_header(hit: &Hit) -> Vec<Prop> {
    // +CMGR: <stat>,[<alpha>],<length>
    let status = if hit.capture.id == "RESPONSE_CMGR" {
        parse(hit.capture.tokens.first())
    } else {
        None
    };
    hit.pdu
        .iter()
        .map(|pdu| Prop::Pdu {
            index: None,
            status,
            pdu: pdu.clone(),
        })
        .collect()
}

fn handle_cmgl(hit: &Hit) -> Vec<Prop> {
    let t = &hit.capture.tokens;
    hit.pdu
        .iter()
        .map(|pdu| Prop::Pdu {
            index: parse(t.first()),
            status: parse(t.get(1)),
            pdu: pdu.clone(),
        })
        .collect()
}

fn handle_cmgs(hit: &Hit) -> Vec<Prop> {
    parse(hit.capture.tokens.first())
        .map(|reference| Prop::Sent { reference })
        .into_iter()
        .collect()
}

fn handle_clip(hit: &Hit) -> Vec<Prop> {
    vec![Prop::Caller {
        number: hit.capture.tokens[0].clone(),
    }]
}

fn handle_cusd(hit: &Hit) -> Vec<Prop> {
    let t = &hit.capture.tokens;
    match parse(t.first()) {
        Some(status) => vec![Prop::Ussd {
            status,
            message: t.get(1).cloned().unwrap_or_default(),
            dcs: parse(t.get(2)),
        }],
        None => Vec::new(),
    }
}

fn handle_signal(hit: &Hit) -> Vec<Prop> {
    let t = &hit.capture.tokens;
    match parse(t.first()) {
        Some(rssi) => vec![Prop::Signal {
            rssi,
            ber: parse(t.get(1)),
        }],
        None => Vec::new(),
    }
}

fn handle_memory_full(hit: &Hit) -> Vec<Prop> {
    vec![Prop::MemoryFull {
        storage: hit.capture.tokens.first().filter(|s| !s.is_empty()).cloned(),
    }]
}

fn handle_cpms(hit: &Hit) -> Vec<Prop> {
    let t = &hit.capture.tokens;
    // Query form starts with the storage name, set form with the counts
    let (name, offset) = match t[0].parse::<u32>() {
        Ok(_) => (None, 0),
        Err(_) => (Some(t[0].clone()), 1),
    };
    match (parse(t.get(offset)), parse(t.get(offset + 1))) {
        (Some(used), Some(total)) => vec![Prop::Storage { name, used, total }],
        _ => Vec::new(),
    }
}

fn handle_csca(hit: &Hit) -> Vec<Prop> {
    vec![Prop::Smsc {
        number: hit.capture.tokens[0].clone(),
    }]
}

fn handle_cops(hit: &Hit) -> Vec<Prop> {
    // +COPS: <mode>[,<format>,<oper>]; only report a registered operator
    hit.capture
        .tokens
        .get(2)
        .filter(|op| !op.is_empty())
        .map(|operator| Prop::Network {
            operator: operator.clone(),
        })
        .into_iter()
        .collect()
}

fn handle_cscs(hit: &Hit) -> Vec<Prop> {
    vec![Prop::Charset {
        charset: hit.capture.tokens[0].clone(),
    }]
}

fn handle_cmgf(hit: &Hit) -> Vec<Prop> {
    vec![Prop::SmsMode {
        pdu: hit.capture.tokens[0] == "0",
    }]
}

fn handle_error(hit: &Hit, kind: ModemErrorKind) -> Vec<Prop> {
    vec![Prop::ModemError {
        kind,
        code: hit.capture.value.trim().parse().ok(),
        diagnostic: hit.capture.value.clone(),
    }]
}

/// Decode a USSD payload
///
/// UCS2 payloads (by DCS or by the `UCS2` character set) arrive as hex and
/// are decoded as UTF-16. A hex payload with a 7-bit DCS is decoded as
/// packed septets unless the character set is `GSM`, where modems hand the
/// text over as is.
pub fn decode_ussd(message: &str, dcs: Option<u8>, charset: Option<&str>) -> String {
    let is_hex = !message.is_empty()
        && message.len() % 2 == 0
        && message.bytes().all(|b| b.is_ascii_hexdigit());
    if !is_hex {
        return message.to_string();
    }
    let Ok(octets) = hex::decode(message) else {
        return message.to_string();
    };

    let charset = charset.map(str::to_ascii_uppercase);
    let scheme = dcs.map(CodingScheme::from_dcs);
    if scheme == Some(CodingScheme::Ucs2) || charset.as_deref() == Some("UCS2") {
        return pdu::decode_ucs2(&octets);
    }
    if scheme == Some(CodingScheme::Gsm7) && charset.as_deref() != Some("GSM") {
        if let Ok(text) = smsgate_pdu::alphabet::decode(&octets, None) {
            return text;
        }
    }
    message.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DELIVER: &str = "0691261801000004048122550000115071015064827BD3E6140495BF410A45CC059A96E5F6F4B80C4ABACD6F85CC050AD6E96F90B40C67E71533178898B697E5749082E6020DDFF0BCA2E60209D9E1F11AC44CCFE90A9B0B7445A7E96510333DA72B14D372BB1E064D9B531039CC0EB741F3F27C9E7EBB4169771A749687E9E9B90B";

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    fn process(raw: &[&str]) -> ProcessOutcome {
        ResponseProcessor::new().process(&DriverProfile::generic(), &lines(raw))
    }

    #[test]
    fn test_cmti_and_ring_in_order() {
        let outcome = process(&["RING", "+CLIP: \"+628123\",145,,,,0", "+CMTI: \"SM\",4"]);
        assert_eq!(
            outcome.props,
            vec![
                Prop::Ring,
                Prop::Caller {
                    number: "+628123".into()
                },
                Prop::StoredMessage {
                    storage: "SM".into(),
                    index: 4
                },
            ]
        );
        assert!(outcome.consumed.iter().all(|c| *c));
    }

    #[test]
    fn test_cmgr_with_pdu() {
        let header = "+CMGR: 1,,123";
        let outcome = process(&[header, DELIVER, "OK"]);
        assert_eq!(
            outcome.props,
            vec![Prop::Pdu {
                index: None,
                status: Some(1),
                pdu: DELIVER.into()
            }]
        );
        assert_eq!(outcome.consumed, vec![true, true, false]);
    }

    #[test]
    fn test_pdu_length_mismatch_waits() {
        let outcome = process(&["+CMT: ,123", &DELIVER[..100]]);
        assert!(outcome.props.is_empty());
        assert_eq!(outcome.consumed, vec![false, false]);
    }

    #[test]
    fn test_cmgl_entries() {
        let outcome = process(&["+CMGL: 3,0,,123", DELIVER, "+CMGL: 5,1,,123", DELIVER, "OK"]);
        let indices: Vec<Option<u32>> = outcome
            .props
            .iter()
            .map(|p| match p {
                Prop::Pdu { index, .. } => *index,
                _ => None,
            })
            .collect();
        assert_eq!(indices, vec![Some(3), Some(5)]);
    }

    #[test]
    fn test_cpms_query_and_set_forms() {
        let outcome = process(&["+CPMS: \"SM\",30,30,\"SM\",30,30,\"SM\",30,30"]);
        assert_eq!(
            outcome.props,
            vec![Prop::Storage {
                name: Some("SM".into()),
                used: 30,
                total: 30
            }]
        );
        let outcome = process(&["+CPMS: 2,50,2,50,2,50"]);
        assert_eq!(
            outcome.props,
            vec![Prop::Storage {
                name: None,
                used: 2,
                total: 50
            }]
        );
    }

    #[test]
    fn test_info_responses() {
        let outcome = process(&[
            "+CSQ: 17,99",
            "+CSCA: \"+6281100000\",145",
            "+COPS: 0,0,\"TELKOMSEL\"",
            "+CSCS: \"IRA\"",
            "+CMGF: 0",
            "+CMGS: 42",
        ]);
        assert_eq!(
            outcome.props,
            vec![
                Prop::Signal {
                    rssi: 17,
                    ber: Some(99)
                },
                Prop::Smsc {
                    number: "+6281100000".into()
                },
                Prop::Network {
                    operator: "TELKOMSEL".into()
                },
                Prop::Charset {
                    charset: "IRA".into()
                },
                Prop::SmsMode { pdu: true },
                Prop::Sent { reference: 42 },
            ]
        );
    }

    #[test]
    fn test_unregistered_cops_has_no_operator() {
        assert!(process(&["+COPS: 0"]).props.is_empty());
    }

    #[test]
    fn test_cme_surfaces_as_prop() {
        let outcome = process(&["+CME ERROR: 100"]);
        assert_eq!(
            outcome.props,
            vec![Prop::ModemError {
                kind: ModemErrorKind::Cme,
                code: Some(100),
                diagnostic: "100".into()
            }]
        );
    }

    #[test]
    fn test_cusd_multiline() {
        let outcome = process(&["+CUSD: 0,\"Balance", "Rp 5.000\",15"]);
        assert_eq!(
            outcome.props,
            vec![Prop::Ussd {
                status: 0,
                message: "Balance\nRp 5.000".into(),
                dcs: Some(15)
            }]
        );
    }

    #[test]
    fn test_driver_specific_pattern() {
        let mut driver = DriverProfile::generic();
        driver.set("RESPONSE_RSSI", "^RSSI:%RSSI%");
        driver.set("RESPONSE_MEMORY_FULL", "^SMMEMFULL:%STORAGE%");
        let outcome =
            ResponseProcessor::new().process(&driver, &lines(&["^RSSI:12", "^SMMEMFULL:\"SM\""]));
        assert_eq!(
            outcome.props,
            vec![
                Prop::Signal { rssi: 12, ber: None },
                Prop::MemoryFull {
                    storage: Some("SM".into())
                }
            ]
        );
        // Without the driver template the lines are left alone
        assert!(process(&["^RSSI:12"]).props.is_empty());
    }

    #[test]
    fn test_unprocessed_lines() {
        let frame = lines(&["SIMCOM_Ltd", "+CSQ: 10,0", "OK"]);
        let outcome = ResponseProcessor::new().process(&DriverProfile::generic(), &frame);
        assert_eq!(outcome.unprocessed(&frame), lines(&["SIMCOM_Ltd", "OK"]));
    }

    #[test]
    fn test_resync_split_pdu() {
        let driver = DriverProfile::generic();
        let mut processor = ResponseProcessor::new();

        let (frame, outcome) =
            processor.process_unsolicited(&driver, lines(&["+CMT: ,123", &DELIVER[..60]]));
        assert!(outcome.props.is_empty());
        processor.retain(outcome.unprocessed(&frame));
        assert_eq!(processor.residue().len(), 2);

        let (frame, outcome) = processor.process_unsolicited(&driver, lines(&[&DELIVER[60..]]));
        assert_eq!(frame.len(), 2);
        assert!(matches!(outcome.props.as_slice(), [Prop::Pdu { pdu, .. }] if pdu == DELIVER));
        assert!(processor.residue().is_empty());
    }

    #[test]
    fn test_resync_split_header() {
        let driver = DriverProfile::generic();
        let mut processor = ResponseProcessor::new();
        processor.retain(lines(&["+CM"]));
        let (_, outcome) = processor.process_unsolicited(&driver, lines(&["TI: \"ME\",9"]));
        assert_eq!(
            outcome.props,
            vec![Prop::StoredMessage {
                storage: "ME".into(),
                index: 9
            }]
        );
    }

    #[test]
    fn test_resync_failure_keeps_residue() {
        let driver = DriverProfile::generic();
        let mut processor = ResponseProcessor::new();
        processor.retain(lines(&["^BOOT:1,2"]));
        let (frame, outcome) = processor.process_unsolicited(&driver, lines(&["+CMTI: \"SM\",1"]));
        assert_eq!(frame, lines(&["+CMTI: \"SM\",1"]));
        assert_eq!(outcome.props.len(), 1);
        assert_eq!(processor.residue(), lines(&["^BOOT:1,2"]).as_slice());
    }

    #[test]
    fn test_residue_is_bounded() {
        let mut processor = ResponseProcessor::new();
        processor.retain((0..40).map(|i| format!("junk {}", i)).collect());
        assert_eq!(processor.residue().len(), MAX_RESIDUE_LINES);
        assert_eq!(processor.residue()[0], "junk 24");
        processor.clear_residue();
        assert!(processor.residue().is_empty());
    }

    #[test]
    fn test_decode_ussd() {
        // "Balance" packed 7-bit
        let packed = hex::encode_upper(smsgate_pdu::alphabet::encode("Balance").unwrap().0);
        assert_eq!(decode_ussd(&packed, Some(15), Some("IRA")), "Balance");
        assert_eq!(decode_ussd(&packed, Some(15), Some("GSM")), packed);
        assert_eq!(decode_ussd("00480069", Some(72), None), "Hi");
        assert_eq!(decode_ussd("00480069", None, Some("ucs2")), "Hi");
        assert_eq!(decode_ussd("Your balance", Some(15), None), "Your balance");
    }
}
