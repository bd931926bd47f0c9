use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::PathBuf,
    sync::{Arc, Mutex},
};

use crate::protocol::bet::Bet;

/// Append-only bet store backed by a CSV file.
///
/// One record per line: `agency,first_name,last_name,document,birthdate,number`.
/// The file itself provides no isolation, so both operations serialize behind
/// an internal lock; `read_all` returns records in append order. During a
/// draw cycle the rendezvous barrier guarantees no appends are in flight
/// while winners are computed.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    path: PathBuf,
    lock: Mutex<()>,
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl Store {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                path: path.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    /// Appends a whole batch as one call.
    pub fn append(&self, bets: &[Bet]) -> Result<(), StoreError> {
        let _guard = self.inner.lock.lock().expect("store lock poisoned");

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        let initial_len = file.metadata()?.len();

        let mut lines = String::new();
        for bet in bets {
            lines.push_str(&format!(
                "{},{},{},{},{},{}\n",
                bet.agency, bet.first_name, bet.last_name, bet.document, bet.birthdate, bet.number,
            ));
        }

        if let Err(err) = file.write_all(lines.as_bytes()) {
            // a partial write must not leave a torn record behind; roll the
            // file back so the failed batch changes nothing
            let _ = file.set_len(initial_len);
            return Err(err.into());
        }

        Ok(())
    }

    /// Reads back every stored bet, in append order.
    pub fn read_all(&self) -> Result<Vec<Bet>, StoreError> {
        let _guard = self.inner.lock.lock().expect("store lock poisoned");

        let content = match fs::read_to_string(&self.inner.path) {
            Ok(content) => content,
            // nothing has been stored yet
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut bets = Vec::new();
        for (index, line) in content.lines().enumerate() {
            if line.is_empty() {
                continue;
            }
            match parse_line(line) {
                Ok(bet) => bets.push(bet),
                // an unreadable line must not take the intact records with it
                Err(reason) => {
                    tracing::warn!(line = index + 1, %reason, "skipping unreadable record")
                }
            }
        }

        Ok(bets)
    }
}

fn parse_line(line: &str) -> Result<Bet, String> {
    let (agency, group) = line
        .split_once(',')
        .ok_or_else(|| "missing agency field".to_owned())?;
    let agency = agency
        .parse()
        .map_err(|_| format!("invalid agency id {agency:?}"))?;

    Bet::parse(agency, group).map_err(|err| err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bet(agency: u8, document: u32, number: u32) -> Bet {
        Bet {
            agency,
            first_name: "Ana".into(),
            last_name: "Diaz".into(),
            document,
            birthdate: "1990-01-01".into(),
            number,
        }
    }

    #[test]
    fn append_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().join("bets.csv"));

        let first = vec![bet(1, 111, 42), bet(1, 222, 7574)];
        let second = vec![bet(2, 333, 9)];
        store.append(&first).unwrap();
        store.append(&second).unwrap();

        let all = store.read_all().unwrap();
        assert_eq!(all, [first, second].concat());
    }

    #[test]
    fn read_all_on_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().join("bets.csv"));
        assert_eq!(store.read_all().unwrap(), vec![]);
    }

    #[test]
    fn unreadable_lines_do_not_take_intact_records_with_them() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bets.csv");
        // a torn trailing line is exactly what an interrupted append leaves
        fs::write(
            &path,
            "1,Ana,Diaz,111,1990-01-01,42\ngarbage\n1,Luis,Paz,222,1985-12-30,7574\n2,Bea",
        )
        .unwrap();

        let all = Store::new(path).read_all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].document, 111);
        assert_eq!(all[1].document, 222);
    }

    #[test]
    fn concurrent_appends_lose_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().join("bets.csv"));

        let handles: Vec<_> = (0..4u8)
            .map(|agency| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..50u32 {
                        store.append(&[bet(agency, i, i)]).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.read_all().unwrap().len(), 200);
    }
}
