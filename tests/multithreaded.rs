//! Multi-threaded integration tests: the deferred-free protocol under real
//! thread traffic.

use std::sync::mpsc;

use reap::Reap;

/// Raw block pointers are plain addresses to the freeing side.
struct SendBlock(*mut u8);
unsafe impl Send for SendBlock {}

#[test]
fn parallel_churn_per_thread() {
    let handles: Vec<_> = (0..8)
        .map(|t| {
            std::thread::spawn(move || {
                let mut live = Vec::new();
                for i in 0..1000usize {
                    let size = 32 + ((t * 7 + i) % 40) * 24;
                    let block = Reap.allocate(size).unwrap();
                    unsafe { block.as_ptr().add(16).write_bytes(t as u8, 16) };
                    live.push(block);
                    if live.len() > 16 {
                        let old = live.remove(0);
                        unsafe { Reap.deallocate(old) };
                    }
                }
                for &block in &live {
                    unsafe { Reap.deallocate(block) };
                }
                // Everything this thread handed out comes back to it.
                assert_eq!(Reap.collect(), 1000);
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn producer_frees_consumer_reclaims() {
    let items = 500;
    let (tx, rx) = mpsc::channel::<SendBlock>();

    // This thread allocates; a helper thread frees every block it receives.
    let freer = std::thread::spawn(move || {
        let mut freed = 0;
        for block in rx {
            unsafe { Reap.deallocate(std::ptr::NonNull::new(block.0).unwrap()) };
            freed += 1;
        }
        freed
    });

    let blocks: Vec<_> = (0..items).map(|_| Reap.allocate(64).unwrap()).collect();
    for &block in &blocks {
        tx.send(SendBlock(block.as_ptr())).unwrap();
    }
    drop(tx);
    assert_eq!(freer.join().unwrap(), items);

    // All frees landed before the join; one pass reclaims everything.
    assert_eq!(Reap.collect(), items);
}

#[test]
fn interleaved_foreign_frees() {
    let rounds = 50;
    for _ in 0..rounds {
        let blocks: Vec<_> = (0..20).map(|_| Reap.allocate(256).unwrap()).collect();
        let handles: Vec<_> = blocks
            .chunks(5)
            .map(|chunk| {
                let chunk: Vec<_> = chunk.iter().map(|b| SendBlock(b.as_ptr())).collect();
                std::thread::spawn(move || {
                    for block in chunk {
                        unsafe { Reap.deallocate(std::ptr::NonNull::new(block.0).unwrap()) };
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(Reap.collect(), blocks.len());
    }
}
