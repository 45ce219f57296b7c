use crate::ReportMetric;
use aws_sdk_cloudwatch::types::StandardUnit;
use bon::Builder;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Findings {
    pub idle_instances: Vec<String>,
    pub oversized_instances: Vec<String>,
    pub unused_volumes: Vec<String>,
    pub unused_elastic_ips: Vec<String>,
}

impl Findings {
    fn categories(&self) -> [(&'static str, &Vec<String>); 4] {
        [
            ("idle instances", &self.idle_instances),
            ("oversized instances", &self.oversized_instances),
            ("unused EBS volumes", &self.unused_volumes),
            ("unused Elastic IPs", &self.unused_elastic_ips),
        ]
    }

    /// One "Found N ..." line per non-empty category.
    pub fn summaries(&self) -> Vec<String> {
        self.categories()
            .into_iter()
            .filter(|(_, ids)| !ids.is_empty())
            .map(|(label, ids)| format!("Found {} {}: {}", ids.len(), label, ids.join(", ")))
            .collect()
    }

    pub fn metrics(&self) -> Vec<ReportMetric> {
        [
            ("IdleInstances", self.idle_instances.len()),
            ("OversizedInstances", self.oversized_instances.len()),
            ("UnusedVolumes", self.unused_volumes.len()),
            ("UnusedElasticIps", self.unused_elastic_ips.len()),
        ]
        .into_iter()
        .map(|(name, count)| ReportMetric {
            name,
            value: count as f64,
            unit: StandardUnit::Count,
        })
        .collect()
    }
}

/// A Cost Explorer suggestion to move an instance to another type.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct RightsizingRecommendation {
    pub resource_id: String,
    /// `Modify` or `Terminate`.
    #[serde(skip)]
    pub rightsizing_type: String,
    pub current_type: String,
    pub recommended_type: String,
    pub estimated_monthly_savings: f64,
}

/// A Cost Explorer suggestion to buy reserved capacity.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ReservationRecommendation {
    pub instance_type: String,
    pub term: String,
    pub payment_option: String,
    pub estimated_monthly_savings: f64,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct Recommendations {
    pub rightsizing: Vec<RightsizingRecommendation>,
    pub reservations: Vec<ReservationRecommendation>,
}

impl Recommendations {
    pub fn is_empty(&self) -> bool {
        self.rightsizing.is_empty() && self.reservations.is_empty()
    }

    pub fn estimated_monthly_savings(&self) -> f64 {
        self.rightsizing
            .iter()
            .map(|r| r.estimated_monthly_savings)
            .chain(self.reservations.iter().map(|r| r.estimated_monthly_savings))
            .sum()
    }

    pub fn lines(&self) -> Vec<String> {
        let rightsizing = self.rightsizing.iter().map(|r| {
            format!(
                "Rightsize {} from {} to {} (saves ${:.2}/month)",
                r.resource_id, r.current_type, r.recommended_type, r.estimated_monthly_savings
            )
        });
        let reservations = self.reservations.iter().map(|r| {
            format!(
                "Reserve {} for {} ({}) (saves ${:.2}/month)",
                r.instance_type, r.term, r.payment_option, r.estimated_monthly_savings
            )
        });
        rightsizing.chain(reservations).collect()
    }
}

#[derive(Builder, Serialize, Debug)]
pub struct CostReport {
    pub message: String,
    pub optimizations: Vec<String>,
    pub cost_analysis: BTreeMap<String, f64>,
    pub recommendations: Recommendations,
}

pub fn report_message(
    optimizations: &[String],
    costs: &BTreeMap<String, f64>,
    recommendations: &Recommendations,
    timestamp: &str,
) -> String {
    let opportunities = if optimizations.is_empty() {
        "No optimization opportunities found".to_string()
    } else {
        optimizations
            .iter()
            .map(|line| format!("- {}", line))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let analysis = if costs.is_empty() {
        "Cost analysis not available".to_string()
    } else {
        let mut sorted: Vec<_> = costs.iter().collect();
        sorted.sort_by(|a, b| b.1.total_cmp(a.1));
        sorted
            .into_iter()
            .map(|(service, cost)| format!("- {}: ${:.2}", service, cost))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let advice = if recommendations.is_empty() {
        "No Cost Explorer recommendations".to_string()
    } else {
        recommendations
            .lines()
            .iter()
            .map(|line| format!("- {}", line))
            .chain(std::iter::once(format!(
                "Estimated monthly savings: ${:.2}",
                recommendations.estimated_monthly_savings()
            )))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "Cost Optimization Report\n\n\
         Optimization Opportunities:\n{opportunities}\n\n\
         Cost Analysis (Current Month):\n{analysis}\n\n\
         Recommendations:\n{advice}\n\n\
         Timestamp: {timestamp}\n\n\
         This is an automated cost optimization report."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summaries_skip_empty_categories() {
        let findings = Findings {
            idle_instances: vec!["i-1".to_string(), "i-2".to_string()],
            unused_elastic_ips: vec!["eipalloc-9".to_string()],
            ..Default::default()
        };

        assert_eq!(
            findings.summaries(),
            vec![
                "Found 2 idle instances: i-1, i-2".to_string(),
                "Found 1 unused Elastic IPs: eipalloc-9".to_string(),
            ]
        );
        assert!(Findings::default().summaries().is_empty());
    }

    #[test]
    fn test_metrics_cover_every_category() {
        let findings = Findings {
            unused_volumes: vec!["vol-1".to_string()],
            ..Default::default()
        };
        let metrics = findings.metrics();

        assert_eq!(metrics.len(), 4);
        assert_eq!(metrics[2].name, "UnusedVolumes");
        assert_eq!(metrics[2].value, 1.0);
        assert!(metrics.iter().all(|m| m.unit == StandardUnit::Count));
    }

    #[test]
    fn test_report_sorts_costs_descending() {
        let costs = BTreeMap::from([
            ("Amazon S3".to_string(), 3.5),
            ("Amazon EC2".to_string(), 120.456),
            ("AWS Lambda".to_string(), 0.1),
        ]);
        let message = report_message(&[], &costs, &Recommendations::default(), "2025-03-17T00:00:00Z");

        assert!(message.contains("No optimization opportunities found"));
        let ec2 = message.find("- Amazon EC2: $120.46").unwrap();
        let s3 = message.find("- Amazon S3: $3.50").unwrap();
        let lambda = message.find("- AWS Lambda: $0.10").unwrap();
        assert!(ec2 < s3 && s3 < lambda);
        assert!(message.contains("Timestamp: 2025-03-17T00:00:00Z"));
    }

    #[test]
    fn test_report_without_costs() {
        let message = report_message(
            &["Found 1 idle instances: i-1".to_string()],
            &BTreeMap::new(),
            &Recommendations::default(),
            "now",
        );
        assert!(message.contains("- Found 1 idle instances: i-1"));
        assert!(message.contains("Cost analysis not available"));
        assert!(message.contains("No Cost Explorer recommendations"));
    }

    #[test]
    fn test_report_lists_recommendations() {
        let recommendations = Recommendations {
            rightsizing: vec![RightsizingRecommendation {
                resource_id: "i-0big".to_string(),
                rightsizing_type: "Modify".to_string(),
                current_type: "m5.2xlarge".to_string(),
                recommended_type: "m5.large".to_string(),
                estimated_monthly_savings: 120.0,
            }],
            reservations: vec![ReservationRecommendation {
                instance_type: "t3.medium".to_string(),
                term: "ONE_YEAR".to_string(),
                payment_option: "NO_UPFRONT".to_string(),
                estimated_monthly_savings: 9.5,
            }],
        };
        let message = report_message(&[], &BTreeMap::new(), &recommendations, "now");

        assert!(message.contains("- Rightsize i-0big from m5.2xlarge to m5.large (saves $120.00/month)"));
        assert!(message.contains("- Reserve t3.medium for ONE_YEAR (NO_UPFRONT) (saves $9.50/month)"));
        assert!(message.contains("Estimated monthly savings: $129.50"));
    }

    #[test]
    fn test_cost_report_serialization() {
        let report = CostReport::builder()
            .message("Cost optimization analysis completed".to_string())
            .optimizations(vec![])
            .cost_analysis(BTreeMap::from([("Amazon EC2".to_string(), 1.5)]))
            .recommendations(Recommendations::default())
            .build();

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["message"], "Cost optimization analysis completed");
        assert_eq!(json["cost_analysis"]["Amazon EC2"], 1.5);
        assert!(json["optimizations"].as_array().unwrap().is_empty());
        assert_eq!(
            json["recommendations"],
            serde_json::json!({"rightsizing": [], "reservations": []})
        );
    }
}
