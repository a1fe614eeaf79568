use cloudrender_core::{plan_upload, PlanError, MIN_PART_SIZE};

#[test]
fn twenty_three_megabytes_over_ten_urls() {
    let plan = plan_upload(23_000_000, 10, 10_485_760).unwrap();

    assert_eq!(plan.part_count, 3);
    assert_eq!(plan.part_size, 10_485_760);
    assert_eq!(plan.parts.len(), 3);
    assert_eq!(plan.total_len(), 23_000_000);
    assert!((plan.progress_step() - 0.2).abs() < 1e-12);
}

#[test]
fn large_file_uses_every_url() {
    let size = 200 * 1024 * 1024 + 7;
    let plan = plan_upload(size, 10, MIN_PART_SIZE).unwrap();

    assert_eq!(plan.part_count, 10);
    assert_eq!(plan.part_size, size.div_ceil(10));
    assert_eq!(plan.total_len(), size);
}

#[test]
fn parts_tile_the_file_for_many_shapes() {
    let min_part = 1_000;
    for file_size in [1u64, 999, 1_000, 1_001, 9_999, 10_000, 10_001, 123_457] {
        for url_count in 1..=12usize {
            let plan = plan_upload(file_size, url_count, min_part).unwrap();

            if file_size >= min_part {
                assert!(plan.part_size >= min_part);
            } else {
                assert_eq!(plan.part_count, 1);
            }
            assert!(plan.part_count <= url_count);
            assert_eq!(plan.part_count as u64, file_size.div_ceil(plan.part_size));
            assert_eq!(plan.total_len(), file_size, "size {file_size} urls {url_count}");

            let mut expected_offset = 0;
            for (index, part) in plan.parts.iter().enumerate() {
                assert_eq!(part.number, index + 1);
                assert_eq!(part.offset, expected_offset);
                assert!(part.len > 0);
                expected_offset += part.len;
            }
        }
    }
}

#[test]
fn no_urls_is_an_error() {
    assert_eq!(plan_upload(5, 0, MIN_PART_SIZE), Err(PlanError::NoUploadUrls));
}
