//! Cache key grammar. Consumers parse some of these keys positionally,
//! so the formats are stable.

pub fn item_detail(item_id: i64) -> String {
    format!("item:detail:{item_id}")
}

pub fn item_lock(item_id: i64) -> String {
    format!("item:lock:{item_id}")
}

pub fn order_detail(order_id: &str) -> String {
    format!("order:{order_id}")
}

pub fn message_detail(message_id: i64) -> String {
    format!("message:{message_id}")
}

pub fn item_root_messages(item_id: i64) -> String {
    format!("item:{item_id}:comments:root")
}

pub fn parent_replies(parent_id: i64) -> String {
    format!("parent:{parent_id}:replies")
}

pub fn seller_items(seller_id: i64) -> String {
    format!("seller:{seller_id}:items:set")
}

pub fn buyer_orders(buyer_id: i64) -> String {
    format!("buyer:{buyer_id}:orders:zset")
}

pub fn seller_orders(seller_id: i64) -> String {
    format!("seller:{seller_id}:orders:zset")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_grammar_is_stable() {
        assert_eq!(item_detail(42), "item:detail:42");
        assert_eq!(item_detail(-7), "item:detail:-7");
        assert_eq!(item_lock(42), "item:lock:42");
        assert_eq!(order_detail("ORD17"), "order:ORD17");
        assert_eq!(message_detail(9), "message:9");
        assert_eq!(message_detail(-2), "message:-2");
        assert_eq!(item_root_messages(42), "item:42:comments:root");
        assert_eq!(parent_replies(9), "parent:9:replies");
        assert_eq!(seller_items(3), "seller:3:items:set");
        assert_eq!(buyer_orders(5), "buyer:5:orders:zset");
        assert_eq!(seller_orders(6), "seller:6:orders:zset");
    }
}
