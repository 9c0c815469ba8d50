/// メッセージID生成
///
/// ID形式: `{エポックミリ秒}-{プロセス内連番}-{プロセストークン}`
///
/// 同一ミリ秒内の書き込みや別プロセスの書き込みでもIDは重複しない。
use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

/// 現在時刻（エポックミリ秒）を返す関数
pub type Clock = fn() -> i64;

/// プロセストークンの長さ（16進文字数）
const TOKEN_LEN: usize = 12;

/// メッセージIDジェネレーター
///
/// 受け付けた書き込み1件につき1つ、プロセスをまたいで一意なIDを払い出す。
#[derive(Debug)]
pub struct MessageIdGenerator {
    clock: Clock,
    sequence: AtomicU64,
    token: String,
}

impl MessageIdGenerator {
    /// システム時刻を使うジェネレーターを作成
    pub fn new() -> Self {
        Self::with_clock(system_clock)
    }

    /// 時刻ソースを指定して作成（テスト用に固定時刻を注入できる）
    pub fn with_clock(clock: Clock) -> Self {
        let mut token = Uuid::new_v4().simple().to_string();
        token.truncate(TOKEN_LEN);

        Self {
            clock,
            sequence: AtomicU64::new(0),
            token,
        }
    }

    /// 次のIDを払い出す
    pub fn next_id(&self) -> String {
        let millis = (self.clock)();
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}-{}", millis, seq, self.token)
    }

    /// このプロセスのトークン
    pub fn token(&self) -> &str {
        &self.token
    }
}

impl Default for MessageIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn system_clock() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn frozen_clock() -> i64 {
        1_700_000_000_000
    }

    #[test]
    fn test_id_has_millis_prefix() {
        let generator = MessageIdGenerator::with_clock(frozen_clock);
        let id = generator.next_id();

        assert!(id.starts_with("1700000000000-"), "unexpected id: {}", id);
        assert!(id.ends_with(generator.token()));
    }

    #[test]
    fn test_token_length() {
        let generator = MessageIdGenerator::new();
        assert_eq!(generator.token().len(), TOKEN_LEN);
        assert!(generator.token().chars().all(|c| c.is_ascii_hexdigit()));
    }

    /// 同一ミリ秒内に払い出したIDが衝突しないこと
    #[test]
    fn test_same_millisecond_ids_are_distinct() {
        let generator = MessageIdGenerator::with_clock(frozen_clock);

        let first = generator.next_id();
        let second = generator.next_id();

        assert_ne!(first, second);
        assert_eq!(first, format!("1700000000000-0-{}", generator.token()));
        assert_eq!(second, format!("1700000000000-1-{}", generator.token()));
    }

    /// 別プロセス（別ジェネレーター）が同じ時刻・同じ連番でも衝突しないこと
    #[test]
    fn test_separate_generators_do_not_collide() {
        let a = MessageIdGenerator::with_clock(frozen_clock);
        let b = MessageIdGenerator::with_clock(frozen_clock);

        assert_ne!(a.token(), b.token());
        assert_ne!(a.next_id(), b.next_id());
    }

    #[test]
    fn test_concurrent_ids_are_unique() {
        let generator = Arc::new(MessageIdGenerator::with_clock(frozen_clock));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let generator = Arc::clone(&generator);
                std::thread::spawn(move || (0..250).map(|_| generator.next_id()).collect::<Vec<_>>())
            })
            .collect();

        let mut ids = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(ids.insert(id), "duplicate id generated");
            }
        }
        assert_eq!(ids.len(), 2000);
    }
}
