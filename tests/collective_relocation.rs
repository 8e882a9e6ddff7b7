use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rangedist::{CollectiveMoveManager, DistChunkedList, DistError, DistMap, Place};

mod support;

use support::{context, iv, seeded_list};

#[test]
fn test_whole_range_moves_between_places() -> anyhow::Result<()> {
    let views = rangedist::run_places(2, |team| {
        let ctx = context(team);
        let ranges = if ctx.place() == Place(0) {
            vec![iv(0, 100)]
        } else {
            vec![]
        };
        let list = seeded_list(&ctx, &ranges)?;
        list.update_dist()?;

        let mut mm = CollectiveMoveManager::new(&ctx);
        if ctx.place() == Place(0) {
            list.move_range_at_sync(iv(0, 100), Place(1), &mut mm)?;
        }
        let report = mm.sync()?;
        list.update_dist()?;

        let mut values = Vec::new();
        list.for_each(|_, v| values.push(*v));
        Ok((list.ranges(), values, list.owner_of(0), report))
    })?;

    let (ranges0, values0, owner0, report0) = &views[0];
    assert!(ranges0.is_empty());
    assert!(values0.is_empty());
    assert_eq!(*owner0, Some(Place(1)));
    assert_eq!(report0.requests_sent, 1);

    let (ranges1, values1, owner1, report1) = &views[1];
    assert_eq!(ranges1, &vec![iv(0, 100)]);
    assert_eq!(values1, &(0..100).map(|i| i * 10).collect::<Vec<_>>());
    assert_eq!(*owner1, Some(Place(1)));
    assert_eq!(report1.requests_received, 1);
    Ok(())
}

#[test]
fn test_random_moves_conserve_elements() -> anyhow::Result<()> {
    const PLACES: usize = 4;
    const ROUNDS: usize = 5;

    let totals = rangedist::run_places(PLACES, |team| {
        let ctx = context(team);
        let me = ctx.place().0 as i64;
        let list = seeded_list(&ctx, &[iv(me * 1000, me * 1000 + 1000)])?;
        list.update_dist()?;

        let mut rng = StdRng::seed_from_u64(0x5eed + me as u64);
        let mut mm = CollectiveMoveManager::new(&ctx);
        let mut totals = vec![list.global_len()?];
        for _ in 0..ROUNDS {
            for range in list.ranges() {
                if range.size() < 2 || rng.random_bool(0.5) {
                    continue;
                }
                let cut = rng.random_range(range.from() + 1..range.to());
                let dest = Place::new(rng.random_range(0..PLACES));
                list.move_range_at_sync(iv(range.from(), cut), dest, &mut mm)?;
            }
            mm.sync()?;
            list.update_dist()?;
            totals.push(list.global_len()?);
        }

        // Every element still carries the value it was created with.
        let wrong = list.try_for_each_collect(|i, v| {
            if *v == i * 10 {
                Ok(())
            } else {
                Err(DistError::callback(format!("{i} holds {v}")))
            }
        });
        assert!(wrong.is_empty(), "{wrong:?}");
        Ok(totals)
    })?;

    for place_totals in &totals {
        assert!(place_totals.iter().all(|t| *t == (PLACES * 1000) as u64));
    }
    Ok(())
}

#[test]
fn test_balance_evens_out_places() -> anyhow::Result<()> {
    let views = rangedist::run_places(3, |team| {
        let ctx = context(team);
        let ranges = if ctx.place() == Place(0) {
            vec![iv(0, 60), iv(100, 130)]
        } else {
            vec![]
        };
        let list: DistChunkedList<i64> = seeded_list(&ctx, &ranges)?;
        list.update_dist()?;

        let mut mm = CollectiveMoveManager::new(&ctx);
        list.balance(&mut mm)?;
        Ok((list.len(), list.owner_of(0), list.owner_of(59), list.owner_of(129)))
    })?;

    assert_eq!(
        views.iter().map(|v| v.0).collect::<Vec<_>>(),
        vec![30, 30, 30]
    );
    for (_, first, middle, last) in &views {
        assert_eq!(*first, Some(Place(0)));
        assert_eq!(*middle, Some(Place(1)));
        assert_eq!(*last, Some(Place(2)));
    }
    Ok(())
}

#[test]
fn test_moving_unheld_range_is_rejected() -> anyhow::Result<()> {
    rangedist::run_places(2, |team| {
        let ctx = context(team);
        let list = seeded_list(&ctx, &[iv(ctx.place().0 as i64 * 10, ctx.place().0 as i64 * 10 + 10)])?;
        let mut mm = CollectiveMoveManager::new(&ctx);
        let other = Place(1 - ctx.place().0);
        let err = list
            .move_range_at_sync(iv(5, 15), other, &mut mm)
            .unwrap_err();
        assert!(matches!(err, DistError::NotLocal(_)));
        assert_eq!(rangedist::MoveManager::pending(&mm), 0);
        Ok(())
    })?;
    Ok(())
}

#[test]
fn test_failed_request_does_not_drop_its_neighbours() -> anyhow::Result<()> {
    let views = rangedist::run_places(2, |team| {
        let ctx = context(team);
        let ranges = if ctx.place() == Place(0) {
            vec![iv(0, 100)]
        } else {
            vec![]
        };
        let list = seeded_list(&ctx, &ranges)?;
        let map: DistMap<u64, String> = DistMap::new(&ctx)?;
        list.update_dist()?;
        let before = list.global_len()?;

        let mut mm = CollectiveMoveManager::new(&ctx);
        if ctx.place() == Place(0) {
            list.move_range_at_sync(iv(0, 100), Place(1), &mut mm)?;
            // Key 42 is held nowhere, so its encoder fails at sync.
            map.move_at_sync(vec![42], Place(1), &mut mm)?;
        }
        let outcome = mm.sync();
        list.update_dist()?;
        Ok((
            before,
            list.global_len()?,
            matches!(outcome, Err(DistError::TagMismatch { .. })),
            outcome.map(|report| report.requests_received).ok(),
            list.len(),
            list.owner_of(99),
        ))
    })?;

    assert_eq!(views[0].0, 100);
    assert_eq!(views[0].1, 100);
    assert!(views[0].2);
    assert_eq!(views[0].4, 0);

    let (_, after, failed, received, len, owner) = &views[1];
    assert_eq!(*after, 100);
    assert!(!failed);
    assert_eq!(*received, Some(1));
    assert_eq!(*len, 100);
    assert_eq!(*owner, Some(Place(1)));
    Ok(())
}
