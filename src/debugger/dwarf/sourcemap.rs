//! Line-number program ingestion and the two source mapping indexes.
//!
//! CDP reports a WebAssembly code position as `lineNumber == 0` plus
//! `columnNumber` equal to the byte offset inside the module, so on this level
//! an "address" is a byte offset relative to the code section start. Both
//! directions are answered from pre-sorted row vectors:
//! * address -> line: the greatest row with address <= query inside the row's
//!   sequence, rows flagged `end_sequence` are exclusive bounds;
//! * (file, line) -> address: among rows of the matched file, the first row
//!   with line >= query, smallest address first.

use super::utils::{canonicalize_path, clone_string_attribute, is_absolute_path};
use crate::debugger::error::Error;
use std::collections::BTreeMap;

const IS_STMT: u8 = 1 << 1;
const END_SEQUENCE: u8 = 1 << 4;

/// A row in the line number program's resulting matrix.
#[derive(Debug, Clone, PartialEq)]
pub(super) struct LineRow {
    pub(super) address: u64,
    pub(super) file_index: usize,
    pub(super) line: u64,
    pub(super) column: u64,
    flags: u8,
}

impl LineRow {
    pub(super) fn new(address: u64, file_index: usize, line: u64, column: u64) -> Self {
        Self {
            address,
            file_index,
            line,
            column,
            flags: 0,
        }
    }

    pub(super) fn with_flags(mut self, is_stmt: bool, end_sequence: bool) -> Self {
        if is_stmt {
            self.flags |= IS_STMT;
        }
        if end_sequence {
            self.flags |= END_SEQUENCE;
        }
        self
    }

    #[inline(always)]
    pub fn is_stmt(&self) -> bool {
        self.flags & IS_STMT == IS_STMT
    }

    #[inline(always)]
    pub fn end_sequence(&self) -> bool {
        self.flags & END_SEQUENCE == END_SEQUENCE
    }
}

/// Line table of a single compilation unit, file indexes are unit-local.
pub(super) struct UnitLineTable {
    pub(super) files: Vec<String>,
    pub(super) rows: Vec<LineRow>,
}

/// A source position resolved from a code offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineInfo {
    pub file: String,
    pub line: Option<u64>,
    pub column: Option<u64>,
}

/// Run the line number program of a unit and collect its rows.
pub(super) fn transform_debug_line<R: gimli::Reader>(
    dwarf: &gimli::Dwarf<R>,
    unit: &gimli::Unit<R>,
) -> Result<Option<UnitLineTable>, Error> {
    let Some(program) = unit.line_program.clone() else {
        return Ok(None);
    };
    let header = program.header().clone();

    let comp_dir = unit
        .comp_dir
        .as_ref()
        .map(|d| d.to_string_lossy().map(|s| s.into_owned()))
        .transpose()?
        .unwrap_or_default();

    let mut files = Vec::new();
    if header.version() <= 4 {
        // DWARF <= 4 keeps file indexes 1-based, index 0 names the unit's primary file
        let name = unit
            .name
            .as_ref()
            .map(|n| n.to_string_lossy().map(|s| s.into_owned()))
            .transpose()?
            .unwrap_or_else(|| "unknown".to_string());
        files.push(canonicalize_path(&join_paths(&comp_dir, &name)));
    }

    for file_entry in header.file_names() {
        let dir = match file_entry.directory(&header) {
            Some(attr) => clone_string_attribute(dwarf, unit, attr)?,
            None => String::new(),
        };
        let path_name = clone_string_attribute(dwarf, unit, file_entry.path_name())?;
        let mut path = join_paths(&dir, &path_name);
        if !is_absolute_path(&canonicalize_path(&path)) {
            path = join_paths(&comp_dir, &path);
        }
        files.push(canonicalize_path(&path));
    }

    let mut rows = Vec::new();
    let mut program_rows = program.rows();
    while let Some((_, row)) = program_rows.next_row()? {
        let line = row.line().map(|l| l.get()).unwrap_or(0);
        let column = match row.column() {
            gimli::ColumnType::Column(c) => c.get(),
            gimli::ColumnType::LeftEdge => 0,
        };
        rows.push(
            LineRow::new(row.address(), row.file_index() as usize, line, column)
                .with_flags(row.is_stmt(), row.end_sequence()),
        );
    }

    Ok(Some(UnitLineTable { files, rows }))
}

fn join_paths(dir: &str, name: &str) -> String {
    let name_canonical = canonicalize_path(name);
    if dir.is_empty() || is_absolute_path(&name_canonical) {
        return name.to_string();
    }
    format!("{dir}/{name}")
}

struct AddressRow {
    address: u64,
    file: usize,
    line: u64,
    column: u64,
    end_sequence: bool,
}

/// Bidirectional address <-> (file, line) index over all units of one module.
pub struct SourceMap {
    files: Vec<String>,
    /// Rows ordered by address, one row per distinct address.
    address_rows: Vec<AddressRow>,
    /// Per file: rows ordered by (line, address), `end_sequence` rows excluded.
    file_rows: Vec<(usize, Vec<(u64, u64)>)>,
}

impl SourceMap {
    pub(super) fn from_units(units: Vec<UnitLineTable>) -> Self {
        let mut files: Vec<String> = Vec::new();
        let mut address_map: BTreeMap<u64, AddressRow> = BTreeMap::new();
        let mut rows_per_file: BTreeMap<usize, Vec<(u64, u64)>> = BTreeMap::new();

        for unit in units {
            let base = files.len();
            let file_count = unit.files.len();
            files.extend(unit.files);

            for row in unit.rows {
                if row.file_index >= file_count {
                    continue;
                }
                let file = base + row.file_index;
                // later rows of the program win on address collisions
                address_map.insert(
                    row.address,
                    AddressRow {
                        address: row.address,
                        file,
                        line: row.line,
                        column: row.column,
                        end_sequence: row.end_sequence(),
                    },
                );
                if !row.end_sequence() && row.line != 0 {
                    rows_per_file
                        .entry(file)
                        .or_default()
                        .push((row.line, row.address));
                }
            }
        }

        let mut file_rows: Vec<(usize, Vec<(u64, u64)>)> = rows_per_file.into_iter().collect();
        for (_, rows) in file_rows.iter_mut() {
            rows.sort_unstable();
        }

        Self {
            files,
            address_rows: address_map.into_values().collect(),
            file_rows,
        }
    }

    /// Map a code offset to a source position (the address -> line tie-break).
    pub fn find_line_info(&self, offset: u64) -> Option<LineInfo> {
        let idx = match self
            .address_rows
            .binary_search_by_key(&offset, |r| r.address)
        {
            Ok(i) => i,
            Err(0) => return None,
            Err(i) => i - 1,
        };

        let row = &self.address_rows[idx];
        if row.end_sequence {
            return None;
        }

        Some(LineInfo {
            file: self.files[row.file].clone(),
            line: (row.line != 0).then_some(row.line),
            column: (row.column != 0).then_some(row.column),
        })
    }

    /// Map a (file, line) pair to the code offset of the matching row
    /// (the line -> address tie-break). File matching is a suffix match so a
    /// user-supplied absolute path finds DWARF's build-root relative one and
    /// vice versa; among several matching files the shortest path wins.
    pub fn find_address(&self, file: &str, line: u64) -> Option<u64> {
        let needle = canonicalize_path(file);

        let (_, rows) = self
            .file_rows
            .iter()
            .filter(|(file_idx, _)| suffix_match(&self.files[*file_idx], &needle))
            .min_by(|(a, _), (b, _)| {
                let a = &self.files[*a];
                let b = &self.files[*b];
                a.len().cmp(&b.len()).then_with(|| a.cmp(b))
            })?;

        let idx = rows.partition_point(|&(row_line, _)| row_line < line);
        rows.get(idx).map(|&(_, address)| address)
    }

    /// All file paths known to the line table.
    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.file_rows
            .iter()
            .map(|(file_idx, _)| self.files[*file_idx].as_str())
    }
}

fn suffix_match(a: &str, b: &str) -> bool {
    fn tail_of(longer: &str, shorter: &str) -> bool {
        longer.ends_with(shorter)
            && longer[..longer.len() - shorter.len()]
                .ends_with(['/'])
    }
    a == b || tail_of(a, b) || tail_of(b, a)
}

#[cfg(test)]
mod test {
    use super::*;

    fn map_with_rows(files: Vec<&str>, rows: Vec<LineRow>) -> SourceMap {
        SourceMap::from_units(vec![UnitLineTable {
            files: files.into_iter().map(|f| f.to_string()).collect(),
            rows,
        }])
    }

    fn simple_map() -> SourceMap {
        map_with_rows(
            vec!["/build/src/main.cpp", "/build/src/util.cpp"],
            vec![
                LineRow::new(0x10, 0, 4, 1).with_flags(true, false),
                LineRow::new(0x14, 0, 5, 1).with_flags(true, false),
                LineRow::new(0x20, 1, 9, 1).with_flags(true, false),
                LineRow::new(0x28, 1, 12, 1).with_flags(true, false),
                LineRow::new(0x30, 1, 0, 0).with_flags(false, true),
            ],
        )
    }

    #[test]
    fn test_address_to_line_is_floor_within_sequence() {
        let map = simple_map();

        let info = map.find_line_info(0x10).unwrap();
        assert_eq!(info.file, "/build/src/main.cpp");
        assert_eq!(info.line, Some(4));

        // between two rows the lower row wins
        let info = map.find_line_info(0x16).unwrap();
        assert_eq!(info.line, Some(5));

        // below the first row nothing matches
        assert!(map.find_line_info(0x0).is_none());
    }

    #[test]
    fn test_end_sequence_is_exclusive() {
        let map = simple_map();
        assert!(map.find_line_info(0x30).is_none());
        assert!(map.find_line_info(0x100).is_none());
    }

    #[test]
    fn test_line_to_address_takes_nearest_line_at_or_after() {
        let map = simple_map();

        assert_eq!(map.find_address("util.cpp", 9), Some(0x20));
        // no row for line 10, the next line down the file wins
        assert_eq!(map.find_address("util.cpp", 10), Some(0x28));
        // past the last line of the file
        assert_eq!(map.find_address("util.cpp", 13), None);
    }

    #[test]
    fn test_file_suffix_matching() {
        let map = simple_map();

        assert_eq!(map.find_address("src/main.cpp", 4), Some(0x10));
        assert_eq!(map.find_address("/build/src/main.cpp", 4), Some(0x10));
        // user path deeper than the compiler-emitted one still matches by tail
        assert_eq!(map.find_address("/home/user/build/src/main.cpp", 4), Some(0x10));
        // partial segment must not match
        assert_eq!(map.find_address("ain.cpp", 4), None);
    }

    #[test]
    fn test_shortest_file_wins_on_ambiguity() {
        let map = map_with_rows(
            vec!["/b/lib/io.cpp", "/a/very/long/build/path/io.cpp"],
            vec![
                LineRow::new(0x10, 0, 3, 0).with_flags(true, false),
                LineRow::new(0x80, 1, 3, 0).with_flags(true, false),
            ],
        );

        assert_eq!(map.find_address("io.cpp", 3), Some(0x10));
    }

    #[test]
    fn test_smallest_address_wins_within_line() {
        let map = map_with_rows(
            vec!["main.cpp"],
            vec![
                LineRow::new(0x40, 0, 7, 4).with_flags(false, false),
                LineRow::new(0x22, 0, 7, 1).with_flags(true, false),
                LineRow::new(0x60, 0, 8, 1).with_flags(true, false),
            ],
        );

        assert_eq!(map.find_address("main.cpp", 7), Some(0x22));
    }

    #[test]
    fn test_roundtrip_never_jumps_past_requested_line() {
        let map = simple_map();

        let addr = map.find_address("util.cpp", 10).unwrap();
        let info = map.find_line_info(addr).unwrap();
        assert!(info.line.unwrap() <= 12);
        assert_eq!(info.file, "/build/src/util.cpp");
    }
}
