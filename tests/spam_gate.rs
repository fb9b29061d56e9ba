// tests/spam_gate.rs
//
// Spam gate behaviour with explicit timestamps (no wall clock).
//
// Covered:
// - legit review allowed, phone + ad keywords blocked
// - low-quality and short-link rules
// - per-source duplicates, cross-source duplicates, same-destination repeats
// - rate-limit window: contribution, forced pending/block, cool-down
// - dry-run checks and clearing the gate's memory

use chrono::{DateTime, Duration, TimeZone, Utc};

use review_sentiment_core::analyze::rate_limit::RateState;
use review_sentiment_core::{ReviewPipeline, ReviewSubmission, SpamAction, SpamFlag};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()
}

/// Fifteen unrelated reviews so duplicate rules stay quiet.
const DISTINCT: [&str; 15] = [
    "Bãi biển sạch, nước trong xanh, hải sản tươi",
    "Phòng khách sạn hơi nhỏ so với hình quảng cáo",
    "Hướng dẫn viên kể chuyện lịch sử rất cuốn hút",
    "Đường lên đỉnh núi khá dốc, nên mang giày thể thao",
    "Quán cà phê view hồ, nhạc acoustic buổi tối",
    "Chợ đêm đông người, đồ ăn vặt phong phú",
    "Xe đưa đón đến trễ gần một tiếng đồng hồ",
    "Bảo tàng có nhiều hiện vật quý từ thời Nguyễn",
    "Homestay chủ nhà dễ thương, bữa sáng tự làm",
    "Vé cáp treo hơi mắc nhưng cảnh trên cao bao la",
    "Thác nước mùa mưa chảy mạnh, đứng xa vẫn ướt",
    "Làng gốm cho khách tự nặn bình mang về",
    "Resort yên tĩnh, hồ bơi vô cực nhìn ra vịnh",
    "Phố cổ về đêm treo đèn lồng khắp các con hẻm",
    "Ruộng bậc thang tháng chín vàng óng cả thung lũng",
];

#[test]
fn legit_negative_review_passes_clean() {
    let p = ReviewPipeline::rule_only();
    let v = p.record_spam_at(
        "Dịch vụ tệ, nhân viên thái độ kém, không bao giờ quay lại",
        "203.0.113.7",
        Some("hoi-an"),
        t0(),
    );
    assert_eq!(v.action, SpamAction::Allow);
    assert_eq!(v.spam_score, 0.0);
    assert!(v.flags.is_empty(), "unexpected flags {:?}", v.flags);
}

#[test]
fn phone_number_with_contact_keywords_is_blocked() {
    let p = ReviewPipeline::rule_only();
    let v = p.record_spam_at(
        "Liên hệ zalo 0912345678 để được tư vấn",
        "203.0.113.8",
        None,
        t0(),
    );
    assert_eq!(v.action, SpamAction::Block);
    assert_eq!(v.spam_score, 1.0);
    assert!(v.has(SpamFlag::ContainsPhone));
    assert!(v.has(SpamFlag::AdKeywordsHigh));
    assert!(v.summary().starts_with("BLOCKED"));
}

#[test]
fn short_text_with_link_is_blocked() {
    let p = ReviewPipeline::rule_only();
    let v = p.record_spam_at("xem thêm tại https://deal-re.vn/abc", "198.51.100.1", None, t0());
    assert!(v.has(SpamFlag::ContainsLink));
    assert_eq!(v.action, SpamAction::Block);
}

#[test]
fn generic_two_word_review_is_low_quality_not_spam() {
    let p = ReviewPipeline::rule_only();
    let v = p.record_spam_at("ok đẹp", "198.51.100.2", None, t0());
    assert!(v.has(SpamFlag::TooShort));
    assert!(v.has(SpamFlag::GenericOnly));
    assert_eq!(v.action, SpamAction::LowQuality);
    assert!(v.action.admits());
}

#[test]
fn repeat_from_same_source_is_flagged_duplicate() {
    let p = ReviewPipeline::rule_only();
    let text = DISTINCT[0];
    let first = p.record_spam_at(text, "src-a", None, t0());
    assert_eq!(first.action, SpamAction::Allow);

    // Case and punctuation differences still collide.
    let again = p.record_spam_at(
        "bãi biển sạch nước trong xanh hải sản tươi!!",
        "src-a",
        None,
        t0() + Duration::minutes(5),
    );
    assert!(again.has(SpamFlag::Duplicate));
    assert!(again.action >= SpamAction::Pending);
}

#[test]
fn duplicate_memory_expires_after_ttl() {
    let p = ReviewPipeline::rule_only();
    let text = DISTINCT[1];
    p.record_spam_at(text, "src-b", None, t0());
    let later = p.record_spam_at(text, "src-b", None, t0() + Duration::hours(25));
    assert!(!later.has(SpamFlag::Duplicate));
    assert!(!later.has(SpamFlag::NearDuplicate));
}

#[test]
fn same_text_from_another_source_is_a_global_duplicate() {
    let p = ReviewPipeline::rule_only();
    let text = DISTINCT[2];
    p.record_spam_at(text, "src-c", None, t0());
    let v = p.record_spam_at(text, "src-d", None, t0() + Duration::minutes(1));
    assert!(v.has(SpamFlag::GlobalDuplicate));
    assert!(!v.has(SpamFlag::Duplicate));
    assert_eq!(v.action, SpamAction::Pending);
}

#[test]
fn second_review_of_same_destination_is_shadowed() {
    let p = ReviewPipeline::rule_only();
    p.record_spam_at(DISTINCT[3], "src-e", Some("sa-pa"), t0());
    let v = p.record_spam_at(DISTINCT[4], "src-e", Some("sa-pa"), t0() + Duration::minutes(2));
    assert!(v.has(SpamFlag::SameDestinationRecent));
    assert_eq!(v.action, SpamAction::Shadow);

    let at = t0() + Duration::minutes(3);
    let elsewhere = p.record_spam_at(DISTINCT[5], "src-e", Some("da-lat"), at);
    assert!(!elsewhere.has(SpamFlag::SameDestinationRecent));
}

#[test]
fn burst_escalates_to_pending_then_block() {
    let p = ReviewPipeline::rule_only();
    let verdicts: Vec<_> = DISTINCT
        .iter()
        .enumerate()
        .map(|(i, text)| {
            let at = t0() + Duration::seconds(i as i64 * 30);
            p.record_spam_at(text, "burst", None, at)
        })
        .collect();

    for v in &verdicts[..5] {
        assert!(!v.has(SpamFlag::RateLimited), "{:?}", v.flags);
        assert_eq!(v.action, SpamAction::Allow);
    }

    // 6th submission: first over the allowance.
    assert!(verdicts[5].has(SpamFlag::RateLimited));
    assert!((verdicts[5].spam_score - 0.15).abs() < 1e-6);

    // 8th: 0.35 crosses the shadow threshold.
    assert_eq!(verdicts[7].action, SpamAction::Shadow);

    // 10th: twice the allowance forces pending.
    assert_eq!(verdicts[9].action, SpamAction::Pending);
    assert!(verdicts[9].spam_score >= 0.5);

    // 15th: three times the allowance forces block.
    assert_eq!(verdicts[14].action, SpamAction::Block);
    assert!(verdicts[14].spam_score >= 0.8);

    let now = t0() + Duration::seconds(14 * 30);
    assert_eq!(p.spam().rate_state("burst", now), RateState::RateLimited);
}

#[test]
fn window_slides_and_source_cools_down() {
    let p = ReviewPipeline::rule_only();
    for (i, text) in DISTINCT.iter().take(8).enumerate() {
        p.record_spam_at(text, "slider", None, t0() + Duration::seconds(i as i64));
    }
    assert_eq!(p.spam().rate_state("slider", t0() + Duration::seconds(10)), RateState::RateLimited);

    let later = t0() + Duration::hours(2);
    assert_eq!(p.spam().rate_state("slider", later), RateState::CooledDown);

    let v = p.record_spam_at(DISTINCT[10], "slider", None, later);
    assert!(!v.has(SpamFlag::RateLimited));
    assert_eq!(v.action, SpamAction::Allow);
    assert_eq!(p.spam().rate_state("unknown", later), RateState::Fresh);
}

#[test]
fn every_input_gets_a_bounded_verdict() {
    let p = ReviewPipeline::rule_only();
    let inputs = ["", "   ", "🔥🔥🔥🔥", "AAAAAAAAAAAA!!!!", "www", "👍 ok"];
    for (i, text) in inputs.iter().enumerate() {
        let v = p.record_spam_at(text, &format!("edge-{i}"), None, t0());
        assert!((0.0..=1.0).contains(&v.spam_score), "{text:?}: {}", v.spam_score);
    }
}

#[test]
fn dry_run_check_leaves_no_trace() {
    let p = ReviewPipeline::rule_only();
    let text = DISTINCT[11];
    for i in 0..7 {
        let v = p.check_spam_at(text, "preview", Some("bat-trang"), t0() + Duration::seconds(i));
        assert_eq!(v.action, SpamAction::Allow, "preview {i}: {:?}", v.flags);
        assert!(v.flags.is_empty());
    }
    assert_eq!(p.spam().rate_state("preview", t0() + Duration::seconds(7)), RateState::Fresh);

    // The real submission right after is judged on its own.
    let v = p.record_spam_at(text, "preview", Some("bat-trang"), t0() + Duration::seconds(8));
    assert_eq!(v.action, SpamAction::Allow);
    assert!(!v.has(SpamFlag::Duplicate));
    assert!(!v.has(SpamFlag::SameDestinationRecent));
    assert!(!v.has(SpamFlag::RateLimited));
}

#[tokio::test]
async fn checked_review_can_still_be_submitted() {
    let p = ReviewPipeline::rule_only();
    let text = DISTINCT[8];
    let checked = p.check_spam_at(text, "1.2.3.4", None, t0());
    assert_eq!(checked.action, SpamAction::Allow);

    let outcome = p
        .submit_review(&ReviewSubmission {
            destination_id: "da-lat".into(),
            text: text.into(),
            rating: 5,
            source_id: "1.2.3.4".into(),
            submitted_at: Some(t0() + Duration::seconds(5)),
        })
        .await;
    assert_eq!(outcome.verdict.action, SpamAction::Allow);
    assert!(!outcome.verdict.has(SpamFlag::Duplicate));
    assert!(outcome.analysis.is_some());
}

#[test]
fn dry_run_predicts_the_recorded_verdict() {
    let p = ReviewPipeline::rule_only();
    for (i, text) in DISTINCT.iter().take(6).enumerate() {
        p.record_spam_at(text, "busy", None, t0() + Duration::seconds(i as i64));
    }
    let at = t0() + Duration::seconds(10);
    let predicted = p.check_spam_at(DISTINCT[0], "busy", None, at);
    let recorded = p.record_spam_at(DISTINCT[0], "busy", None, at);
    assert_eq!(predicted, recorded);
    assert!(recorded.has(SpamFlag::Duplicate));
    assert!(recorded.has(SpamFlag::RateLimited));
}

#[test]
fn clearing_memory_resets_sources_to_fresh() {
    let p = ReviewPipeline::rule_only();
    for (i, text) in DISTINCT.iter().take(7).enumerate() {
        p.record_spam_at(text, "noisy", Some("vung-tau"), t0() + Duration::seconds(i as i64));
    }
    let at = t0() + Duration::seconds(8);
    assert_eq!(p.spam().rate_state("noisy", at), RateState::RateLimited);

    p.clear_spam_memory();
    assert_eq!(p.spam().rate_state("noisy", at), RateState::Fresh);
    let v = p.record_spam_at(DISTINCT[0], "noisy", Some("vung-tau"), at);
    assert_eq!(v.action, SpamAction::Allow);
    assert!(v.flags.is_empty(), "unexpected flags {:?}", v.flags);
}
