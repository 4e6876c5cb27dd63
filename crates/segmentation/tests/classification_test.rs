//! Integration tests for audience classification across the public API:
//! segments, smart lists and workflow audiences over shared contact data.

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use crm_core::{AudienceDefinition, CampaignMetric, FilterType, Record, Rule};
    use crm_segmentation::{AudienceBuilder, MembershipClassifier, SegmentationEngine};
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    /// A small contact book exported from the entity store.
    fn contacts() -> Vec<Record> {
        serde_json::from_value(json!([
            {
                "id": "id1", "email": "a@x.com", "first_name": "Ada",
                "company": "ACME", "status": "customer", "source": "webinar",
                "tags": ["VIP", "newsletter"], "lead_score": 91,
                "last_engaged": "2024-06-12T08:00:00Z"
            },
            {
                "id": "id2", "email": "b@x.com", "first_name": "Brook",
                "company": "Globex", "status": "lead", "source": "referral",
                "tags": ["newsletter"], "lead_score": "40",
                "last_engaged": "2024-03-01"
            },
            {
                "id": "id3", "email": "c@y.org", "first_name": "Cy",
                "company": "acme labs", "status": "prospect",
                "tags": [], "lead_score": 65
            },
            {
                "id": "id4", "email": "d@x.com",
                "status": "inactive", "lead_score": null
            }
        ]))
        .unwrap()
    }

    fn metrics() -> Vec<CampaignMetric> {
        serde_json::from_value(json!([
            { "campaign_id": "spring", "recipient_email": "a@x.com", "opened_at": "2024-01-01" },
            { "campaign_id": "summer", "recipient_email": "B@X.com", "opened_at": "2024-06-01", "clicked_at": "2024-06-01" },
            { "campaign_id": "summer", "recipient_email": "c@y.org", "bounced": true }
        ]))
        .unwrap()
    }

    fn automatic(rules: Vec<Rule>) -> AudienceDefinition {
        AudienceDefinition {
            id: "segment".to_string(),
            name: "segment".to_string(),
            filter_type: FilterType::Automatic,
            rules,
            contact_ids: Vec::new(),
        }
    }

    fn ids(records: &[&Record]) -> Vec<String> {
        records.iter().filter_map(|r| r.id()).collect()
    }

    /// Rule sets exercising every field type and operator.
    fn rule_sets() -> Vec<Vec<Rule>> {
        vec![
            vec![],
            vec![Rule::new("company", "contains", "acme")],
            vec![Rule::new("status", "in", "customer,lead")],
            vec![Rule::new("tags", "contains", "newsletter")],
            vec![Rule::new("lead_score", "between", "30,70")],
            vec![Rule::new("last_engaged", "within_days", "30")],
            vec![Rule::new("opened_email", "has", "")],
            vec![Rule::new("bounced_email", "has_not", "")],
            vec![
                Rule::new("email_domain", "equals", "x.com"),
                Rule::new("tags", "not_contains", "vip"),
            ],
            vec![Rule::new("lead_score", "greater_than", "abc")],
        ]
    }

    // -----------------------------------------------------------------------
    // Count always equals the matched collection size
    // -----------------------------------------------------------------------
    #[test]
    fn test_count_equals_matched_len() {
        let classifier = MembershipClassifier::contacts();
        let contacts = contacts();
        let metrics = metrics();

        for rules in rule_sets() {
            let definition = automatic(rules);
            let result = classifier.classify_at(&contacts, &definition, &metrics, now());
            assert_eq!(result.count(), result.matched.len());
            assert_eq!(
                classifier.count_at(&contacts, &definition, &metrics, now()),
                result.matched.len(),
                "{:?}",
                definition.rules
            );
        }
    }

    // -----------------------------------------------------------------------
    // Empty rule set is the identity filter
    // -----------------------------------------------------------------------
    #[test]
    fn test_empty_rule_set_matches_everything() {
        let classifier = MembershipClassifier::contacts();
        let contacts = contacts();

        let result = classifier.classify_at(&contacts, &automatic(vec![]), &[], now());
        assert_eq!(result.into_owned(), contacts);
    }

    // -----------------------------------------------------------------------
    // Adding a rule never grows the match set
    // -----------------------------------------------------------------------
    #[test]
    fn test_and_semantics_are_monotonic() {
        let classifier = MembershipClassifier::contacts();
        let contacts = contacts();
        let metrics = metrics();

        for base in rule_sets() {
            let before = classifier.classify_at(&contacts, &automatic(base.clone()), &metrics, now());
            let before_ids = ids(&before.matched);

            for extra in rule_sets().into_iter().flatten() {
                let mut narrowed = base.clone();
                narrowed.push(extra);
                let after = classifier.classify_at(&contacts, &automatic(narrowed), &metrics, now());
                for id in ids(&after.matched) {
                    assert!(before_ids.contains(&id), "{id} appeared after adding a rule");
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Text comparisons ignore case
    // -----------------------------------------------------------------------
    #[test]
    fn test_text_rules_are_case_insensitive() {
        let classifier = MembershipClassifier::contacts();
        let contacts = contacts();
        let definition = automatic(vec![Rule::new("company", "equals", "Acme")]);

        let result = classifier.classify_at(&contacts, &definition, &[], now());
        assert_eq!(ids(&result.matched), vec!["id1"]);
    }

    // -----------------------------------------------------------------------
    // Behavioral join
    // -----------------------------------------------------------------------
    #[test]
    fn test_behavioral_join() {
        let classifier = MembershipClassifier::contacts();
        let records: Vec<Record> = serde_json::from_value(json!([
            { "email": "a@x.com" },
            { "email": "b@x.com" }
        ]))
        .unwrap();
        let metrics: Vec<CampaignMetric> = serde_json::from_value(json!([
            { "recipient_email": "a@x.com", "opened_at": "2024-01-01" }
        ]))
        .unwrap();

        let has = automatic(vec![Rule::new("opened_email", "has", "")]);
        let result = classifier.classify_at(&records, &has, &metrics, now());
        assert_eq!(result.matched, vec![&records[0]]);

        let has_not = automatic(vec![Rule::new("opened_email", "has_not", "")]);
        let result = classifier.classify_at(&records, &has_not, &metrics, now());
        assert_eq!(result.matched, vec![&records[1]]);
    }

    #[test]
    fn test_behavioral_rules_without_metrics() {
        let classifier = MembershipClassifier::contacts();
        let contacts = contacts();

        let has = automatic(vec![Rule::new("clicked_link", "has", "")]);
        assert_eq!(classifier.count_at(&contacts, &has, &[], now()), 0);

        let has_not = automatic(vec![Rule::new("clicked_link", "has_not", "")]);
        assert_eq!(classifier.count_at(&contacts, &has_not, &[], now()), contacts.len());
    }

    #[test]
    fn test_campaign_scoped_behavior() {
        let classifier = MembershipClassifier::contacts();
        let contacts = contacts();
        let metrics = metrics();

        let any = automatic(vec![Rule::new("opened_email", "has", "")]);
        let summer = automatic(vec![Rule::new("opened_email", "has", "").for_campaign("summer")]);

        let result = classifier.classify_at(&contacts, &any, &metrics, now());
        assert_eq!(ids(&result.matched), vec!["id1", "id2"]);
        let result = classifier.classify_at(&contacts, &summer, &metrics, now());
        assert_eq!(ids(&result.matched), vec!["id2"]);
    }

    // -----------------------------------------------------------------------
    // within_days boundary
    // -----------------------------------------------------------------------
    #[test]
    fn test_within_days_boundary() {
        let classifier = MembershipClassifier::contacts();
        let exactly = Record::new()
            .with("id", "exactly")
            .with("last_engaged", (now() - Duration::days(7)).to_rfc3339());
        let over = Record::new()
            .with("id", "over")
            .with("last_engaged", (now() - Duration::days(7) - Duration::seconds(1)).to_rfc3339());
        let records = vec![exactly, over];

        let definition = automatic(vec![Rule::new("last_engaged", "within_days", "7")]);
        let result = classifier.classify_at(&records, &definition, &[], now());
        assert_eq!(ids(&result.matched), vec!["exactly"]);
    }

    #[test]
    fn test_within_days_past_calendar_range() {
        let records = vec![
            Record::new()
                .with("id", "engaged")
                .with("last_engaged", "2024-06-01T00:00:00Z"),
            Record::new().with("id", "never"),
        ];
        let definition = automatic(vec![Rule::new("last_engaged", "within_days", "4294967295")]);

        let classifier = MembershipClassifier::contacts();
        let result = classifier.classify_at(&records, &definition, &[], now());
        assert_eq!(ids(&result.matched), vec!["engaged"]);

        let engine = SegmentationEngine::new();
        engine.register(definition.clone()).unwrap();
        assert_eq!(engine.estimate_size(&definition.id, &records, &[]).unwrap(), 1);
    }

    // -----------------------------------------------------------------------
    // Malformed numeric rule never matches
    // -----------------------------------------------------------------------
    #[test]
    fn test_malformed_numeric_rule() {
        let classifier = MembershipClassifier::contacts();
        let records: Vec<Record> = [json!(-1), json!(0), json!(42), json!(1.5e12), json!("77")]
            .into_iter()
            .map(|score| Record::new().with("lead_score", score))
            .collect();

        let definition = automatic(vec![Rule::new("lead_score", "greater_than", "abc")]);
        assert_eq!(classifier.count_at(&records, &definition, &[], now()), 0);
    }

    // -----------------------------------------------------------------------
    // Manual lists ignore rules
    // -----------------------------------------------------------------------
    #[test]
    fn test_manual_mode_ignores_rules() {
        let classifier = MembershipClassifier::contacts();
        let contacts = contacts();
        let definition = AudienceDefinition {
            filter_type: FilterType::Manual,
            contact_ids: vec!["id1".to_string()],
            ..automatic(vec![
                Rule::new("status", "equals", "lead"),
                Rule::new("opened_email", "has_not", ""),
            ])
        };

        let result = classifier.classify_at(&contacts, &definition, &metrics(), now());
        assert_eq!(ids(&result.matched), vec!["id1"]);
    }

    // -----------------------------------------------------------------------
    // Partially-authored rules
    // -----------------------------------------------------------------------
    #[test]
    fn test_empty_value_does_not_exclude_records() {
        let classifier = MembershipClassifier::contacts();
        let contacts = contacts();
        let definition = automatic(vec![
            Rule::new("company", "equals", ""),
            Rule::new("lead_score", "greater_than", ""),
        ]);

        assert_eq!(
            classifier.count_at(&contacts, &definition, &[], now()),
            contacts.len()
        );
    }

    // -----------------------------------------------------------------------
    // Persisted definitions through the registry
    // -----------------------------------------------------------------------
    #[test]
    fn test_engine_round_trip_from_persisted_json() {
        let engine = SegmentationEngine::new();
        let definition: AudienceDefinition = serde_json::from_value(json!({
            "id": "engaged-newsletter",
            "name": "Engaged newsletter readers",
            "filter_type": "automatic",
            "rules": [
                { "field": "tags", "operator": "contains", "value": "newsletter" },
                { "field": "clicked_link", "operator": "has_not", "value": "" }
            ]
        }))
        .unwrap();
        engine.register(definition).unwrap();

        let contacts = contacts();
        let result = engine
            .classify("engaged-newsletter", &contacts, &metrics())
            .unwrap();
        assert_eq!(ids(&result.matched), vec!["id1"]);
    }

    #[test]
    fn test_builder_segment_matches_expected_contacts() {
        let classifier = MembershipClassifier::contacts();
        let contacts = contacts();
        let segment = AudienceBuilder::new("Warm webinar leads")
            .status_in(&["lead", "customer"])
            .lead_score_between(35.0, 95.0)
            .lacks_tag("churned")
            .build();

        let result = classifier.classify_at(&contacts, &segment, &[], now());
        assert_eq!(ids(&result.matched), vec!["id1", "id2"]);
    }
}
