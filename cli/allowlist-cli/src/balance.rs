//! Ingestion of allowlist source files into per-cohort balance maps.
//!
//! A source is delimited text with a header line followed by rows of
//! `name, address, cohort, limit`. Rows are read one at a time; a bad row is
//! recorded as a [`RowFault`] and skipped without affecting its neighbours.
//!
//! Sources are merged in the order they are fed to the [`Assembler`]. When an
//! address shows up again, the later row wins: it replaces the name entry and
//! the limit, and moves the address to the later row's cohort. An address that
//! stays in its cohort keeps its position; one that changes cohort is appended
//! to its new map.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io::{BufRead, Split};
use std::str::FromStr;
use tracing::warn;

use crate::address::Address;
use crate::common::decimal;
use crate::error::Error;
use crate::leaf::parse_amount;

const DELIMITER: char = ',';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Cohort {
    Private,
    Public,
}

impl Cohort {
    /// Every label other than `Private` selects the public cohort.
    pub fn from_label(label: &str) -> Self {
        if label.trim() == "Private" {
            Cohort::Private
        } else {
            Cohort::Public
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Cohort::Private => "Private",
            Cohort::Public => "Public",
        }
    }
}

impl fmt::Display for Cohort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Cohort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "private" => Ok(Cohort::Private),
            "public" => Ok(Cohort::Public),
            other => Err(format!("unknown cohort '{other}', expected private or public")),
        }
    }
}

/// One allowlist row after validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entitlement {
    pub address: Address,
    pub limit: u128,
    pub cohort: Cohort,
    pub display_name: String,
}

/// Metadata shown for an address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NameEntry {
    pub name: String,
    pub status: Cohort,
    #[serde(with = "decimal")]
    pub mint_limit: u128,
}

pub type NameMap = BTreeMap<Address, NameEntry>;

/// Address to limit mapping that remembers insertion order.
///
/// Order matters: it fixes each address's leaf index. Removal leaves a hole
/// that is compacted away once holes outnumber live entries.
#[derive(Debug, Clone, Default)]
pub struct BalanceMap {
    entries: Vec<Option<(Address, u128)>>,
    positions: HashMap<Address, usize>,
}

impl BalanceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn get(&self, address: &Address) -> Option<u128> {
        let &i = self.positions.get(address)?;
        self.entries[i].map(|(_, limit)| limit)
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.positions.contains_key(address)
    }

    /// Sets the limit for `address`, keeping its position if already present.
    /// Returns the previous limit.
    pub fn insert(&mut self, address: Address, limit: u128) -> Option<u128> {
        match self.positions.get(&address) {
            Some(&i) => self.entries[i].replace((address, limit)).map(|(_, old)| old),
            None => {
                self.positions.insert(address, self.entries.len());
                self.entries.push(Some((address, limit)));
                None
            }
        }
    }

    /// Removes `address`. Later entries keep their relative order.
    pub fn remove(&mut self, address: &Address) -> Option<u128> {
        let index = self.positions.remove(address)?;
        let (_, limit) = self.entries[index].take()?;
        if self.entries.len() > 2 * self.positions.len() {
            self.compact();
        }
        Some(limit)
    }

    fn compact(&mut self) {
        self.entries.retain(Option::is_some);
        for (i, (address, _)) in self.entries.iter().flatten().enumerate() {
            self.positions.insert(*address, i);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Address, u128)> {
        self.entries.iter().flatten()
    }
}

impl PartialEq for BalanceMap {
    fn eq(&self, other: &Self) -> bool {
        self.iter().eq(other.iter())
    }
}

impl Eq for BalanceMap {}

impl FromIterator<(Address, u128)> for BalanceMap {
    fn from_iter<T: IntoIterator<Item = (Address, u128)>>(iter: T) -> Self {
        let mut map = BalanceMap::new();
        for (address, limit) in iter {
            map.insert(address, limit);
        }
        map
    }
}

impl Serialize for BalanceMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (address, limit) in self.iter() {
            map.serialize_entry(address, limit)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for BalanceMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedVisitor;

        impl<'de> Visitor<'de> for OrderedVisitor {
            type Value = BalanceMap;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of address to limit")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut map = BalanceMap::new();
                while let Some((address, limit)) = access.next_entry::<Address, u128>()? {
                    map.insert(address, limit);
                }
                Ok(map)
            }
        }

        deserializer.deserialize_map(OrderedVisitor)
    }
}

/// Why a row was skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "camelCase")]
pub enum RowFaultKind {
    MissingField(String),
    InvalidAddress(String),
    ZeroAddress,
    InvalidLimit(String),
    AmountOverflow(String),
    Unreadable(String),
}

/// A skipped row, located by source and 1-based line number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowFault {
    pub source: String,
    pub line: usize,
    pub fault: RowFaultKind,
}

/// Counters and faults gathered during one ingestion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub accepted: usize,
    pub overrides: usize,
    pub cohort_moves: usize,
    pub faults: Vec<RowFault>,
    pub missing_sources: Vec<String>,
}

impl IngestReport {
    pub fn skipped(&self) -> usize {
        self.faults.len()
    }
}

/// Splits one line into trimmed fields. Double-quoted fields may contain the
/// delimiter, and `""` inside quotes is a literal quote.
fn split_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            c if c == DELIMITER && !in_quotes => {
                fields.push(current.trim().to_string());
                current.clear();
            }
            c => current.push(c),
        }
    }
    fields.push(current.trim().to_string());
    fields
}

/// Validates one data row.
///
/// The name and cohort cells may be empty; an empty cohort label is public.
/// A column past the end of the row, an empty address or an empty limit is a
/// `MissingField`.
pub fn parse_row(line: &str) -> Result<Entitlement, RowFaultKind> {
    let fields = split_fields(line);
    let column = |i: usize, name: &str| {
        fields
            .get(i)
            .map(String::as_str)
            .ok_or_else(|| RowFaultKind::MissingField(name.to_string()))
    };
    let required = |i: usize, name: &str| {
        column(i, name).and_then(|f| {
            if f.is_empty() {
                Err(RowFaultKind::MissingField(name.to_string()))
            } else {
                Ok(f)
            }
        })
    };

    let display_name = column(0, "name")?.to_string();
    let address = Address::normalize(required(1, "address")?).map_err(|e| match e {
        Error::InvalidAddress(reason) => RowFaultKind::InvalidAddress(reason),
        other => RowFaultKind::InvalidAddress(other.to_string()),
    })?;
    if address.is_zero() {
        return Err(RowFaultKind::ZeroAddress);
    }
    let cohort = Cohort::from_label(column(2, "cohort")?);
    let limit = parse_amount(required(3, "limit")?).map_err(|e| match e {
        Error::AmountOverflow(reason) => RowFaultKind::AmountOverflow(reason),
        other => RowFaultKind::InvalidLimit(other.to_string()),
    })?;

    Ok(Entitlement {
        address,
        limit,
        cohort,
        display_name,
    })
}

/// True while `record` ends inside a double-quoted field.
fn quote_open(record: &str) -> bool {
    record.bytes().filter(|&b| b == b'"').count() % 2 == 1
}

/// Lazily yields `(line number, row result)` for every data row of a source.
///
/// The header record and blank lines are skipped. A quoted field may span
/// lines; the row is numbered by the line it starts on. A line that cannot be
/// read or decoded is yielded as an `Unreadable` fault.
pub fn rows<R: BufRead>(reader: R) -> Rows<R> {
    Rows {
        lines: reader.split(b'\n'),
        line: 0,
        header_seen: false,
    }
}

/// Iterator returned by [`rows`].
pub struct Rows<R> {
    lines: Split<R>,
    line: usize,
    header_seen: bool,
}

impl<R: BufRead> Rows<R> {
    fn next_line(&mut self) -> Option<Result<String, RowFaultKind>> {
        let bytes = self.lines.next()?;
        self.line += 1;
        let text = match bytes {
            Ok(bytes) => String::from_utf8(bytes)
                .map_err(|_| RowFaultKind::Unreadable("not valid UTF-8".into())),
            Err(e) => Err(RowFaultKind::Unreadable(e.to_string())),
        };
        Some(text.map(|t| t.trim_end_matches('\r').to_string()))
    }
}

impl<R: BufRead> Iterator for Rows<R> {
    type Item = (usize, Result<Entitlement, RowFaultKind>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let first = self.next_line()?;
            let start = self.line;
            let mut record = match first {
                Ok(text) => text,
                Err(_) if !self.header_seen => {
                    self.header_seen = true;
                    continue;
                }
                Err(fault) => return Some((start, Err(fault))),
            };
            while quote_open(&record) {
                match self.next_line() {
                    Some(Ok(more)) => {
                        record.push('\n');
                        record.push_str(&more);
                    }
                    Some(Err(fault)) => return Some((start, Err(fault))),
                    None => break,
                }
            }

            if !self.header_seen {
                self.header_seen = true;
                continue;
            }
            if record.trim().is_empty() {
                continue;
            }
            return Some((start, parse_row(&record)));
        }
    }
}

/// The three maps produced by one ingestion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BalanceMaps {
    pub private: BalanceMap,
    pub public: BalanceMap,
    pub names: NameMap,
}

impl BalanceMaps {
    pub fn cohort(&self, cohort: Cohort) -> &BalanceMap {
        match cohort {
            Cohort::Private => &self.private,
            Cohort::Public => &self.public,
        }
    }

    fn cohort_mut(&mut self, cohort: Cohort) -> &mut BalanceMap {
        match cohort {
            Cohort::Private => &mut self.private,
            Cohort::Public => &mut self.public,
        }
    }
}

/// Accumulates sources into [`BalanceMaps`].
#[derive(Debug, Default)]
pub struct Assembler {
    maps: BalanceMaps,
    report: IngestReport,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds every row of one source.
    pub fn ingest<R: BufRead>(&mut self, source: &str, reader: R) {
        for (line, row) in rows(reader) {
            match row {
                Ok(entitlement) => self.apply(source, line, entitlement),
                Err(fault) => {
                    warn!(source, line, ?fault, "skipping allowlist row");
                    self.report.faults.push(RowFault {
                        source: source.to_string(),
                        line,
                        fault,
                    });
                }
            }
        }
    }

    /// Records that a source was absent and contributes no rows.
    pub fn mark_missing(&mut self, source: &str) {
        warn!(source, "allowlist source missing, treating as empty");
        self.report.missing_sources.push(source.to_string());
    }

    fn apply(&mut self, source: &str, line: usize, entitlement: Entitlement) {
        let Entitlement {
            address,
            limit,
            cohort,
            display_name,
        } = entitlement;

        if let Some(previous) = self.maps.names.get(&address).map(|entry| entry.status) {
            self.report.overrides += 1;
            if previous != cohort {
                self.report.cohort_moves += 1;
                self.maps.cohort_mut(previous).remove(&address);
            }
            warn!(
                source,
                line,
                %address,
                from = %previous,
                to = %cohort,
                "later row overrides earlier entitlement"
            );
        }

        self.maps.cohort_mut(cohort).insert(address, limit);
        self.maps.names.insert(
            address,
            NameEntry {
                name: display_name,
                status: cohort,
                mint_limit: limit,
            },
        );
        self.report.accepted += 1;
    }

    pub fn finish(self) -> (BalanceMaps, IngestReport) {
        (self.maps, self.report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: &str = "0xB0c445C292C2E33388118Bef6FE2AD9D313f90ec";
    const BOB: &str = "0x79A16789FC811DbD21C5fD6c96BA93c7c709f7d0";
    const CAROL: &str = "0xBf8fF255aD1f369929715a3290d1ef71d79f8954";

    fn addr(text: &str) -> Address {
        Address::normalize(text).unwrap()
    }

    fn assemble(sources: &[(&str, &str)]) -> (BalanceMaps, IngestReport) {
        let mut assembler = Assembler::new();
        for (name, body) in sources {
            assembler.ingest(name, body.as_bytes());
        }
        assembler.finish()
    }

    #[test]
    fn test_parse_row() {
        let row = parse_row(&format!(" Alice , {} , Private , 5 ", ALICE.to_lowercase())).unwrap();
        assert_eq!(row.display_name, "Alice");
        assert_eq!(row.address, addr(ALICE));
        assert_eq!(row.cohort, Cohort::Private);
        assert_eq!(row.limit, 5);
    }

    #[test]
    fn test_parse_row_quoted_name() {
        let row = parse_row(&format!("\"Doe, \"\"J\"\"\",{BOB},Public,1")).unwrap();
        assert_eq!(row.display_name, "Doe, \"J\"");
    }

    #[test]
    fn test_parse_row_faults() {
        assert_eq!(
            parse_row(&format!("Alice,{ALICE},Private")),
            Err(RowFaultKind::MissingField("limit".into()))
        );
        assert!(matches!(
            parse_row("Alice,0x1234,Private,1"),
            Err(RowFaultKind::InvalidAddress(_))
        ));
        assert_eq!(
            parse_row("Zero,0x0000000000000000000000000000000000000000,Public,1"),
            Err(RowFaultKind::ZeroAddress)
        );
        assert!(matches!(
            parse_row(&format!("Alice,{ALICE},Private,ten")),
            Err(RowFaultKind::InvalidLimit(_))
        ));
        assert!(matches!(
            parse_row(&format!("Alice,{ALICE},Private,999999999999999999999999999999999999999999")),
            Err(RowFaultKind::AmountOverflow(_))
        ));
    }

    #[test]
    fn test_unknown_label_is_public() {
        assert_eq!(Cohort::from_label("Whitelist"), Cohort::Public);
        assert_eq!(Cohort::from_label("private"), Cohort::Public);
        assert_eq!(Cohort::from_label(" Private "), Cohort::Private);
    }

    #[test]
    fn test_rows_skip_header_and_blank_lines() {
        let body = format!("name,address,status,limit\r\n\nAlice,{ALICE},Private,1\r\n   \nBob,{BOB},Public,2\n");
        let rows: Vec<_> = rows(body.as_bytes()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, 3);
        assert_eq!(rows[1].0, 5);
        assert!(rows.iter().all(|(_, r)| r.is_ok()));
    }

    #[test]
    fn test_malformed_rows_are_skipped_and_counted() {
        let body = format!(
            "name,address,status,limit\nAlice,{ALICE},Private,10\nBroken,{BOB},Private,abc\nCarol,{CAROL},Private,30\n"
        );
        let (maps, report) = assemble(&[("PRIVATE.csv", &body)]);

        assert_eq!(maps.private.len(), 2);
        assert_eq!(maps.private.get(&addr(ALICE)), Some(10));
        assert_eq!(maps.private.get(&addr(CAROL)), Some(30));
        assert!(!maps.private.contains(&addr(BOB)));
        assert!(!maps.names.contains_key(&addr(BOB)));

        assert_eq!(report.accepted, 2);
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.faults[0].source, "PRIVATE.csv");
        assert_eq!(report.faults[0].line, 3);
        assert!(matches!(report.faults[0].fault, RowFaultKind::InvalidLimit(_)));
    }

    #[test]
    fn test_rows_split_by_cohort_in_order() {
        let body = format!(
            "h\nCarol,{CAROL},Public,3\nAlice,{ALICE},Private,1\nBob,{BOB},Whitelist,2\n"
        );
        let (maps, _) = assemble(&[("mixed.csv", &body)]);

        let public: Vec<_> = maps.public.iter().map(|(a, _)| *a).collect();
        assert_eq!(public, vec![addr(CAROL), addr(BOB)]);
        assert_eq!(maps.private.len(), 1);
        assert_eq!(maps.names[&addr(BOB)].status, Cohort::Public);
        assert_eq!(maps.names[&addr(BOB)].name, "Bob");
    }

    #[test]
    fn test_later_source_wins_and_moves_cohort() {
        let private = format!("h\nAlice,{ALICE},Private,1\nBob,{BOB},Private,2\nCarol,{CAROL},Private,3\n");
        let public = format!("h\nBobby,{BOB},Public,20\nCarol,{CAROL},Private,30\n");
        let (maps, report) = assemble(&[("PRIVATE.csv", &private), ("PUBLIC.csv", &public)]);

        let private_order: Vec<_> = maps.private.iter().copied().collect();
        assert_eq!(private_order, vec![(addr(ALICE), 1), (addr(CAROL), 30)]);
        assert_eq!(maps.public.get(&addr(BOB)), Some(20));
        assert_eq!(maps.names[&addr(BOB)].name, "Bobby");
        assert_eq!(maps.names[&addr(BOB)].mint_limit, 20);

        assert_eq!(report.overrides, 2);
        assert_eq!(report.cohort_moves, 1);
        assert_eq!(report.accepted, 5);
    }

    #[test]
    fn test_missing_source_reported() {
        let mut assembler = Assembler::new();
        assembler.mark_missing("PUBLIC.csv");
        let (maps, report) = assembler.finish();
        assert!(maps.public.is_empty());
        assert_eq!(report.missing_sources, vec!["PUBLIC.csv".to_string()]);
    }

    #[test]
    fn test_balance_map_remove_keeps_order() {
        let a = Address::from_bytes([1; 20]);
        let b = Address::from_bytes([2; 20]);
        let c = Address::from_bytes([3; 20]);
        let mut map: BalanceMap = [(a, 1), (b, 2), (c, 3)].into_iter().collect();

        assert_eq!(map.remove(&a), Some(1));
        assert_eq!(map.get(&c), Some(3));
        assert_eq!(map.insert(c, 4), Some(3));
        let order: Vec<_> = map.iter().copied().collect();
        assert_eq!(order, vec![(b, 2), (c, 4)]);
    }

    #[test]
    fn test_balance_map_json_preserves_order() {
        let (maps, _) = assemble(&[(
            "s",
            &format!("h\nC,{CAROL},Public,3\nA,{ALICE},Public,1\nB,{BOB},Public,2\n"),
        )]);
        let json = serde_json::to_string(&maps.public).unwrap();
        assert!(json.find(CAROL).unwrap() < json.find(ALICE).unwrap());

        let back: BalanceMap = serde_json::from_str(&json).unwrap();
        assert_eq!(back, maps.public);
    }

    #[test]
    fn test_name_entry_json_shape() {
        let entry = NameEntry {
            name: "Alice".into(),
            status: Cohort::Private,
            mint_limit: 3,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json, serde_json::json!({"name": "Alice", "status": "Private", "mintLimit": "3"}));
    }

    #[test]
    fn test_name_entry_json_above_u64() {
        let entry = NameEntry {
            name: "Whale".into(),
            status: Cohort::Public,
            mint_limit: 1 << 70,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["mintLimit"], "1180591620717411303424");
        let back: NameEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn test_parse_row_empty_name_and_label() {
        let row = parse_row(&format!(",{ALICE},Private,1")).unwrap();
        assert_eq!(row.display_name, "");
        assert_eq!(row.cohort, Cohort::Private);

        let row = parse_row(&format!("Bob,{BOB},,1")).unwrap();
        assert_eq!(row.display_name, "Bob");
        assert_eq!(row.cohort, Cohort::Public);
    }

    #[test]
    fn test_parse_row_empty_required_cells() {
        assert_eq!(
            parse_row("Bob,,Public,1"),
            Err(RowFaultKind::MissingField("address".into()))
        );
        assert_eq!(
            parse_row(&format!("Bob,{BOB},Public,")),
            Err(RowFaultKind::MissingField("limit".into()))
        );
        assert_eq!(
            parse_row(&format!("Bob,{BOB}")),
            Err(RowFaultKind::MissingField("cohort".into()))
        );
    }

    #[test]
    fn test_rows_quoted_field_spans_lines() {
        let body = format!("name,address,status,limit\n\"Alice\nLiddell\",{ALICE},Private,1\nBob,{BOB},Public,2\n");
        let rows: Vec<_> = rows(body.as_bytes()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, 2);
        assert_eq!(rows[0].1.as_ref().unwrap().display_name, "Alice\nLiddell");
        assert_eq!(rows[1].0, 4);
        assert_eq!(rows[1].1.as_ref().unwrap().address, addr(BOB));
    }

    #[test]
    fn test_balance_map_many_removals_keep_order() {
        let addrs: Vec<_> = (1..=40u8).map(|i| Address::from_bytes([i; 20])).collect();
        let mut map: BalanceMap = addrs.iter().map(|a| (*a, 1)).collect();

        for a in addrs.iter().step_by(2).chain(addrs.iter().skip(1).step_by(4)) {
            assert_eq!(map.remove(a), Some(1));
        }
        assert_eq!(map.remove(&addrs[0]), None);

        let survivors: Vec<_> = addrs.iter().skip(3).step_by(4).copied().collect();
        let order: Vec<_> = map.iter().map(|(a, _)| *a).collect();
        assert_eq!(order, survivors);
        assert_eq!(map.len(), survivors.len());
        for a in &survivors {
            assert_eq!(map.get(a), Some(1));
        }

        map.insert(addrs[0], 7);
        assert_eq!(map.iter().last(), Some(&(addrs[0], 7)));
        let rebuilt: BalanceMap = map.iter().copied().collect();
        assert_eq!(rebuilt, map);
    }
}
