//! Run-scoped counters

use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStat {
    pub worker_id: i64,
    pub toots: u32,
    pub tweets: u32,
    pub instas: u32,
    pub elapsed: Duration,
}

impl WorkerStat {
    pub fn new(worker_id: i64) -> Self {
        Self {
            worker_id,
            ..Default::default()
        }
    }

    pub fn add_toot(&mut self) {
        self.toots += 1;
    }

    pub fn add_tweet(&mut self) {
        self.tweets += 1;
    }

    pub fn add_insta(&mut self) {
        self.instas += 1;
    }

    pub fn items(&self) -> u32 {
        self.toots + self.tweets + self.instas
    }

    /// Elapsed time as `M:SS`
    pub fn formatted_time(&self) -> String {
        let secs = self.elapsed.as_secs();
        format!("{}:{:02}", secs / 60, secs % 60)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeStat {
    pub bridge_id: i64,
    pub toots: u32,
    pub tweets: u32,
    pub instas: u32,
}

impl BridgeStat {
    pub fn new(bridge_id: i64) -> Self {
        Self {
            bridge_id,
            ..Default::default()
        }
    }

    pub fn add_toot(&mut self) {
        self.toots += 1;
    }

    pub fn add_tweet(&mut self) {
        self.tweets += 1;
    }

    pub fn add_insta(&mut self) {
        self.instas += 1;
    }

    pub fn items(&self) -> u32 {
        self.toots + self.tweets + self.instas
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let mut stat = WorkerStat::new(2);
        stat.add_toot();
        stat.add_toot();
        stat.add_tweet();
        stat.add_insta();

        assert_eq!(stat.items(), 4);
        assert_eq!(stat.worker_id, 2);
    }

    #[test]
    fn test_formatted_time() {
        let stat = WorkerStat {
            elapsed: Duration::from_secs(125),
            ..WorkerStat::new(1)
        };
        assert_eq!(stat.formatted_time(), "2:05");
    }

    #[test]
    fn test_bridge_stat_items() {
        let mut stat = BridgeStat::new(9);
        assert_eq!(stat.items(), 0);
        stat.add_tweet();
        assert_eq!(stat.items(), 1);
    }
}
