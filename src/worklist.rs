use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use log::{error, info};

/// Load the worklist of nicknames from a file. `.csv` files use their
/// first column (a NICKNAME/USERNAME header row is skipped); anything else
/// is read as one nickname per line, with `#` starting a comment line.
/// Order is preserved, duplicates are dropped.
pub fn load_identifiers<P: AsRef<Path>>(path: P) -> Vec<String> {
    let path = path.as_ref();
    if !path.exists() {
        error!("Worklist file {:?} does not exist.", path);
        return Vec::new();
    }

    let is_csv = path.extension().map_or(false, |ext| ext == "csv");
    let raw = if is_csv {
        load_csv(path)
    } else {
        load_lines(path)
    };

    let mut seen = HashSet::new();
    let names: Vec<String> = raw.into_iter().filter(|n| seen.insert(n.clone())).collect();
    info!("Loaded {} identifier(s) from {:?}", names.len(), path);
    names
}

fn load_csv(path: &Path) -> Vec<String> {
    let mut names = Vec::new();
    let mut reader = match csv::ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
    {
        Ok(r) => r,
        Err(e) => {
            error!("Could not open worklist CSV: {e}");
            return names;
        }
    };

    for (i, result) in reader.records().enumerate() {
        match result {
            Ok(record) => {
                let Some(first) = record.get(0) else { continue };
                let first = first.trim();
                if first.is_empty() {
                    continue;
                }
                if i == 0 && matches!(first.to_uppercase().as_str(), "NICKNAME" | "USERNAME") {
                    continue;
                }
                names.push(first.to_string());
            }
            Err(e) => error!("Error parsing worklist record: {e}"),
        }
    }
    names
}

fn load_lines(path: &Path) -> Vec<String> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) => {
            error!("Could not open worklist file: {e}");
            return Vec::new();
        }
    };

    BufReader::new(file)
        .lines()
        .map_while(|l| l.ok())
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn plain_file_loads_one_nickname_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("targets.txt");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "# targets for tonight").unwrap();
        writeln!(file, "alice").unwrap();
        writeln!(file, "  bob  ").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "alice").unwrap();

        let names = load_identifiers(&path);
        assert_eq!(names, vec!["alice".to_string(), "bob".to_string()]);
    }

    #[test]
    fn csv_file_uses_first_column_and_skips_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("targets.csv");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "USERNAME,STATUS").unwrap();
        writeln!(file, "alice,PENDING").unwrap();
        writeln!(file, "bob,PENDING").unwrap();

        let names = load_identifiers(&path);
        assert_eq!(names, vec!["alice".to_string(), "bob".to_string()]);
    }

    #[test]
    fn missing_file_yields_an_empty_worklist() {
        assert!(load_identifiers("no-such-file.txt").is_empty());
    }
}
